//! Structural bookkeeping shared by every context: sibling positions, the
//! open-element path and character data pending between two element boundaries.

use std::collections::HashMap;

use compact_str::CompactString;
use string_cache::DefaultAtom;

use crate::error::SniffError;
use crate::event::ExpandedName;

/// 1-based position of an element among its preceding siblings, counted three ways
/// so that `name[n]`, `prefix:*[n]` and `*[n]` all resolve on the child axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiblingPosition {
    pub named: u32,
    pub in_namespace: u32,
    pub any: u32,
}

#[derive(Debug, Default)]
struct Frame {
    named: HashMap<ExpandedName, u32>,
    namespaces: HashMap<Option<DefaultAtom>, u32>,
    any: u32,
}

impl Frame {
    fn count(&mut self, name: &ExpandedName) -> SiblingPosition {
        let named = self.named.entry(name.clone()).or_insert(0);
        *named += 1;
        let in_namespace = self.namespaces.entry(name.ns_uri.clone()).or_insert(0);
        *in_namespace += 1;
        self.any += 1;
        SiblingPosition { named: *named, in_namespace: *in_namespace, any: self.any }
    }
}

/// One frame per open element plus the document frame.
#[derive(Debug)]
pub struct PositionCounters {
    frames: Vec<Frame>,
}

impl Default for PositionCounters {
    fn default() -> Self {
        Self { frames: vec![Frame::default()] }
    }
}

impl PositionCounters {
    pub fn reset(&mut self) {
        self.frames.clear();
        self.frames.push(Frame::default());
    }

    pub fn push(&mut self, name: &ExpandedName) -> SiblingPosition {
        let position = match self.frames.last_mut() {
            Some(frame) => frame.count(name),
            None => {
                let mut frame = Frame::default();
                let position = frame.count(name);
                self.frames.push(frame);
                position
            }
        };
        self.frames.push(Frame::default());
        position
    }

    pub fn pop(&mut self) -> Result<(), SniffError> {
        if self.frames.len() <= 1 {
            return Err(SniffError::protocol("end element without matching start element"));
        }
        self.frames.pop();
        Ok(())
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }
}

/// Open-element names, used only to label hits.
#[derive(Debug, Default)]
pub struct NamePath {
    steps: Vec<String>,
}

impl NamePath {
    pub fn reset(&mut self) {
        self.steps.clear();
    }

    pub fn push(&mut self, name: &ExpandedName, position: u32) {
        self.steps.push(format!("{}[{position}]", name.local));
    }

    pub fn pop(&mut self) {
        self.steps.pop();
    }

    /// Path of the current element, e.g. `/root[1]/a[2]`.
    pub fn location(&self) -> String {
        if self.steps.is_empty() {
            return "/".to_string();
        }
        let mut location = String::new();
        for step in &self.steps {
            location.push('/');
            location.push_str(step);
        }
        location
    }

    pub fn attribute_location(&self, name: &ExpandedName) -> String {
        let mut location = self.location();
        if !location.ends_with('/') {
            location.push('/');
        }
        location.push('@');
        location.push_str(&name.local);
        location
    }
}

/// Character data since the last element boundary.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    buffer: CompactString,
}

impl TextAccumulator {
    pub fn append(&mut self, chars: &str) {
        self.buffer.push_str(chars);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Takes the collected text, leaving the accumulator empty.
    pub fn drain_and_reset(&mut self) -> CompactString {
        std::mem::take(&mut self.buffer)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_counted_per_parent() {
        let mut counters = PositionCounters::default();
        let a = ExpandedName::local("a");
        let b = ExpandedName::local("b");
        counters.push(&ExpandedName::local("root"));
        assert_eq!(counters.push(&a), SiblingPosition { named: 1, in_namespace: 1, any: 1 });
        counters.pop().unwrap();
        assert_eq!(counters.push(&b), SiblingPosition { named: 1, in_namespace: 2, any: 2 });
        assert_eq!(counters.push(&a), SiblingPosition { named: 1, in_namespace: 1, any: 1 });
        counters.pop().unwrap();
        counters.pop().unwrap();
        assert_eq!(counters.push(&a).named, 2);
        assert_eq!(counters.depth(), 2);
    }

    #[test]
    fn popping_the_document_frame_is_a_protocol_violation() {
        let mut counters = PositionCounters::default();
        assert!(matches!(counters.pop(), Err(SniffError::ProtocolViolation(_))));
    }

    #[test]
    fn name_path_renders_locations() {
        let mut path = NamePath::default();
        assert_eq!(path.location(), "/");
        path.push(&ExpandedName::local("root"), 1);
        path.push(&ExpandedName::local("a"), 2);
        assert_eq!(path.location(), "/root[1]/a[2]");
        assert_eq!(path.attribute_location(&ExpandedName::local("id")), "/root[1]/a[2]/@id");
        path.pop();
        assert_eq!(path.location(), "/root[1]");
    }

    #[test]
    fn text_is_drained_once() {
        let mut text = TextAccumulator::default();
        text.append("4");
        text.append("2");
        assert_eq!(text.drain_and_reset(), "42");
        assert!(text.is_empty());
    }
}
