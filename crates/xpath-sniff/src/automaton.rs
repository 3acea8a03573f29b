//! The streaming matching automaton.
//!
//! The [`Frontier`] holds every live [`Context`]: one thread per partial match,
//! pinned to a query node. Element opens fork a context for every matching child
//! or constraint; element closes pop contexts back to their parents and merge
//! threads that ended up in the same state.
//!
//! `depth` of a context:
//! * `0`: evaluating the pinned node's children against each new event,
//! * `< 0`: absorbing the subtree of a consumable node; its children and
//!   constraints keep being tested at every element inside,
//! * `> 0`: nothing matched, the subtree is skipped until it closes.

use core::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::event::{Attribute, ExpandedName};
use crate::model::{QueryModel, QueryNodeId};
use crate::state::SiblingPosition;

/// One live partial match: a query node reached at some nesting depth.
///
/// Contexts compare equal on `(node, depth)`; `order` and `parent` only
/// identify the instance and restore the previous state on close.
#[derive(Debug, Clone)]
pub struct Context {
    node: QueryNodeId,
    depth: i32,
    order: u64,
    parent: Option<Rc<Context>>,
}

impl Context {
    /// Context anchored at the document node.
    pub fn root(model: &QueryModel) -> Self {
        Self { node: model.root(), depth: 0, order: 0, parent: None }
    }

    pub(crate) fn forked(node: QueryNodeId, order: u64, parent: &Rc<Context>) -> Self {
        Self { node, depth: 0, order, parent: Some(Rc::clone(parent)) }
    }

    pub fn node(&self) -> QueryNodeId {
        self.node
    }

    /// Zero while testing children, positive while skipping, negative while absorbing (see module docs).
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Document order of the element this context was forked on (0 for the root context).
    pub fn order(&self) -> u64 {
        self.order
    }

    /// State to restore when this context's element closes.
    pub fn parent(&self) -> Option<&Context> {
        self.parent.as_deref()
    }

    /// This context followed by its ancestors.
    pub fn chain(&self) -> impl Iterator<Item = &Context> {
        std::iter::successors(Some(self), |context| context.parent())
    }

    /// The nearest context in the chain pinned to `node`.
    pub fn find(&self, node: QueryNodeId) -> Option<&Context> {
        self.chain().find(|context| context.node == node)
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.depth == other.depth
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
        self.depth.hash(state);
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}@{}", self.depth, self.node, self.order)
    }
}

/// What a hit matched, handed to the [`HitSink`].
#[derive(Debug, Clone, Copy)]
pub enum Matched<'a> {
    /// The element currently being opened.
    Element,
    Text(&'a str),
    /// `index` is the attribute's position on the element being opened.
    Attribute { index: usize, attribute: &'a Attribute },
}

/// Receives the automaton's output.
pub trait HitSink {
    /// `node` matched; `scope` is the context whose evaluation produced the match.
    fn hit(&mut self, node: QueryNodeId, matched: Matched<'_>, scope: &Rc<Context>);

    /// `context` popped: the element it was forked on has closed.
    fn ending_context(&mut self, context: &Context);
}

/// The element being opened, as seen by the start transition.
#[derive(Debug, Clone, Copy)]
pub struct ElementEvent<'a> {
    pub name: &'a ExpandedName,
    pub position: SiblingPosition,
    pub order: u64,
}

fn snapshot<'s>(context: &Context, slot: &'s mut Option<Rc<Context>>) -> &'s Rc<Context> {
    slot.get_or_insert_with(|| Rc::new(context.clone()))
}

impl Context {
    fn match_text(&self, model: &QueryModel, text: &str, sink: &mut impl HitSink) {
        if self.depth > 0 || text.is_empty() {
            return;
        }
        let mut scope = None;
        for &child in model.node(self.node).children() {
            if model.node(child).matches_text(text) {
                let scope = snapshot(self, &mut scope);
                sink.hit(child, Matched::Text(text), scope);
                text_constraints(model, child, text, scope, sink);
            }
        }
    }

    fn start_element(mut self, model: &QueryModel, element: ElementEvent<'_>, next: &mut Vec<Context>, sink: &mut impl HitSink) {
        if self.depth > 0 {
            self.depth += 1;
            next.push(self);
            return;
        }
        let before = next.len();
        let mut scope = None;
        let node = model.node(self.node);
        for &child in node.children() {
            if model.node(child).matches_element(element.name, &element.position) {
                let scope = snapshot(&self, &mut scope);
                sink.hit(child, Matched::Element, scope);
                next.push(Context::forked(child, element.order, scope));
                element_constraints(model, child, element, scope, next, sink);
            }
        }
        if node.consumable() {
            let scope = Rc::clone(snapshot(&self, &mut scope));
            self.depth -= 1;
            let pinned = self.node;
            next.push(self);
            element_constraints(model, pinned, element, &scope, next, sink);
        } else if next.len() == before {
            self.depth += 1;
            next.push(self);
        }
    }

    fn match_attributes(&self, model: &QueryModel, attributes: &[Attribute], sink: &mut impl HitSink) {
        if self.depth > 0 || attributes.is_empty() {
            return;
        }
        let mut scope = None;
        for (index, attribute) in attributes.iter().enumerate() {
            for &child in model.node(self.node).children() {
                let child_node = model.node(child);
                if !child_node.matches_attribute(&attribute.name, &attribute.value) {
                    continue;
                }
                let scope = snapshot(self, &mut scope);
                sink.hit(child, Matched::Attribute { index, attribute }, scope);
                for &constraint in child_node.constraints() {
                    if model.node(constraint).matches_attribute(&attribute.name, &attribute.value) {
                        sink.hit(constraint, Matched::Attribute { index, attribute }, scope);
                    }
                }
            }
        }
    }

    fn end_element(self, sink: &mut impl HitSink) -> Option<Context> {
        match self.depth {
            0 => {
                sink.ending_context(&self);
                self.parent.map(Rc::unwrap_or_clone)
            }
            depth if depth > 0 => Some(Context { depth: depth - 1, ..self }),
            depth => Some(Context { depth: depth + 1, ..self }),
        }
    }
}

/// Constraint chain of `of` against the opened element: each match is a hit and a fork.
fn element_constraints(
    model: &QueryModel,
    of: QueryNodeId,
    element: ElementEvent<'_>,
    scope: &Rc<Context>,
    next: &mut Vec<Context>,
    sink: &mut impl HitSink,
) {
    for &constraint in model.node(of).constraints() {
        if model.node(constraint).matches_element(element.name, &element.position) {
            sink.hit(constraint, Matched::Element, scope);
            next.push(Context::forked(constraint, element.order, scope));
            element_constraints(model, constraint, element, scope, next, sink);
        }
    }
}

fn text_constraints(model: &QueryModel, of: QueryNodeId, text: &str, scope: &Rc<Context>, sink: &mut impl HitSink) {
    for &constraint in model.node(of).constraints() {
        if model.node(constraint).matches_text(text) {
            sink.hit(constraint, Matched::Text(text), scope);
            text_constraints(model, constraint, text, scope, sink);
        }
    }
}

/// Double-buffered set of live contexts.
#[derive(Debug)]
pub struct Frontier {
    current: Vec<Context>,
    next: Vec<Context>,
    max_len: usize,
}

impl Frontier {
    /// Frontier holding only the root context of `model`.
    pub fn new(model: &QueryModel) -> Self {
        Self { current: vec![Context::root(model)], next: Vec::new(), max_len: 1 }
    }

    /// Drops every context and starts over from the root.
    pub fn reset(&mut self, model: &QueryModel) {
        self.current.clear();
        self.next.clear();
        self.current.push(Context::root(model));
        self.max_len = 1;
    }

    /// Live contexts in fork order.
    pub fn contexts(&self) -> &[Context] {
        &self.current
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Largest frontier seen since the last reset.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Text pending before an element boundary, matched against the current frontier.
    pub fn match_text(&self, model: &QueryModel, text: &str, sink: &mut impl HitSink) {
        for context in &self.current {
            context.match_text(model, text, sink);
        }
    }

    /// Advances every context over an element open, then matches the element's
    /// attributes against the new frontier. Forks are kept as a multiset.
    pub fn start_element(
        &mut self,
        model: &QueryModel,
        element: ElementEvent<'_>,
        attributes: &[Attribute],
        sink: &mut impl HitSink,
    ) {
        let current = std::mem::take(&mut self.current);
        for context in current {
            context.start_element(model, element, &mut self.next, sink);
        }
        self.swap();
        for context in &self.current {
            context.match_attributes(model, attributes, sink);
        }
    }

    /// Advances every context over an element close, merging equal contexts.
    pub fn end_element(&mut self, sink: &mut impl HitSink) {
        let current = std::mem::take(&mut self.current);
        for context in current {
            if let Some(next) = context.end_element(sink) {
                if !self.next.contains(&next) {
                    self.next.push(next);
                }
            }
        }
        self.swap();
    }

    fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
        self.next.clear();
        self.max_len = self.max_len.max(self.current.len());
    }
}

impl fmt::Display for Frontier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, context) in self.current.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{context}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeTest;

    #[derive(Default)]
    struct Recorded {
        hits: Vec<QueryNodeId>,
        ended: Vec<QueryNodeId>,
    }

    impl HitSink for Recorded {
        fn hit(&mut self, node: QueryNodeId, _matched: Matched<'_>, _scope: &Rc<Context>) {
            self.hits.push(node);
        }

        fn ending_context(&mut self, context: &Context) {
            self.ended.push(context.node());
        }
    }

    fn open(frontier: &mut Frontier, model: &QueryModel, name: &str, order: u64, sink: &mut Recorded) {
        let name = ExpandedName::local(name);
        let element = ElementEvent { name: &name, position: SiblingPosition { named: 1, in_namespace: 1, any: 1 }, order };
        frontier.start_element(model, element, &[], sink);
    }

    #[test]
    fn unmatched_subtree_is_skipped_and_restored() {
        let mut model = QueryModel::new();
        let a = model.path(&["a"]).unwrap();
        let mut frontier = Frontier::new(&model);
        let mut sink = Recorded::default();

        open(&mut frontier, &model, "x", 1, &mut sink);
        assert_eq!(frontier.contexts()[0].depth(), 1);
        open(&mut frontier, &model, "a", 2, &mut sink);
        assert_eq!(frontier.contexts()[0].depth(), 2);
        frontier.end_element(&mut sink);
        frontier.end_element(&mut sink);
        assert!(sink.hits.is_empty());

        open(&mut frontier, &model, "a", 3, &mut sink);
        assert_eq!(sink.hits, [a]);
        assert_eq!(frontier.contexts()[0].node(), a);
        frontier.end_element(&mut sink);
        assert_eq!(sink.ended, [a]);
        assert_eq!(frontier.contexts(), &[Context::root(&model)]);
    }

    #[test]
    fn absorbing_context_returns_to_zero_on_matching_close() {
        let mut model = QueryModel::new();
        let b = model.descendant_step(model.root(), NodeTest::element("b")).unwrap();
        let mut frontier = Frontier::new(&model);
        let mut sink = Recorded::default();

        open(&mut frontier, &model, "a", 1, &mut sink);
        open(&mut frontier, &model, "b", 2, &mut sink);
        open(&mut frontier, &model, "b", 3, &mut sink);
        let hits_on_b = sink.hits.iter().filter(|node| **node == b).count();
        assert_eq!(hits_on_b, 2);
        frontier.end_element(&mut sink);
        frontier.end_element(&mut sink);
        let descendant = model.node(model.root()).children()[0];
        assert!(frontier.contexts().iter().any(|context| context.node() == descendant && context.depth() == 0));
        frontier.end_element(&mut sink);
        assert_eq!(frontier.contexts(), &[Context::root(&model)]);
    }

    #[test]
    fn equal_contexts_merge_on_close() {
        let mut model = QueryModel::new();
        model.child(model.root(), NodeTest::element("a")).unwrap();
        model.child(model.root(), NodeTest::element("a")).unwrap();
        let mut frontier = Frontier::new(&model);
        let mut sink = Recorded::default();
        open(&mut frontier, &model, "a", 1, &mut sink);
        assert_eq!(frontier.len(), 2);
        frontier.end_element(&mut sink);
        assert_eq!(frontier.len(), 1);
    }
}
