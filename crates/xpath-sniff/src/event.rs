//! The push-event boundary with the XML tokenizer.

use core::fmt;
use string_cache::DefaultAtom;

use crate::error::SniffError;

/// Namespace-resolved element or attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns_uri: Option<DefaultAtom>,
    pub local: DefaultAtom,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<&str>, local: &str) -> Self {
        Self { ns_uri: ns_uri.filter(|uri| !uri.is_empty()).map(DefaultAtom::from), local: DefaultAtom::from(local) }
    }

    /// Name in no namespace.
    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }

    pub fn ns_uri(&self) -> Option<&str> {
        self.ns_uri.as_deref()
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// An attribute of a start tag, namespace declarations excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: ExpandedName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: ExpandedName, value: impl Into<String>) -> Self {
        Self { name, value: value.into() }
    }
}

/// One event of a well-formed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaxEvent {
    StartDocument,
    StartElement { name: ExpandedName, attributes: Vec<Attribute> },
    Characters(String),
    EndElement,
    EndDocument,
}

impl SaxEvent {
    pub fn start(local: &str) -> Self {
        SaxEvent::StartElement { name: ExpandedName::local(local), attributes: Vec::new() }
    }

    pub fn start_with(name: ExpandedName, attributes: Vec<Attribute>) -> Self {
        SaxEvent::StartElement { name, attributes }
    }

    pub fn text(text: &str) -> Self {
        SaxEvent::Characters(text.to_string())
    }
}

/// Pull-side view of an event producer. `Ok(None)` means the source is exhausted.
pub trait EventSource {
    fn next_event(&mut self) -> Result<Option<SaxEvent>, SniffError>;
}

impl<I> EventSource for I
where
    I: Iterator<Item = SaxEvent>,
{
    fn next_event(&mut self) -> Result<Option<SaxEvent>, SniffError> {
        Ok(self.next())
    }
}
