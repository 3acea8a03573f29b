//! [`EventSource`] over XML text, backed by `quick-xml`'s namespace-aware reader.
//!
//! The adapter only translates: no validation, no DTD handling, no IO.
//! Empty elements are expanded into start + end, CDATA is forwarded as
//! characters, and `xmlns` declarations are not reported as attributes.

use std::collections::VecDeque;

use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;

use crate::error::SniffError;
use crate::event::{Attribute, EventSource, ExpandedName, SaxEvent};

/// [`EventSource`] over an XML string, namespace-aware.
pub struct XmlSource<'a> {
    reader: NsReader<&'a [u8]>,
    pending: VecDeque<SaxEvent>,
    started: bool,
    finished: bool,
}

impl<'a> XmlSource<'a> {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(xml: &'a str) -> Self {
        let mut reader = NsReader::from_str(xml);
        let config = reader.config_mut();
        config.trim_text(false);
        config.expand_empty_elements = true;
        Self { reader, pending: VecDeque::new(), started: false, finished: false }
    }

    fn read_next(&mut self) -> Result<(), SniffError> {
        loop {
            let (resolved, event) = self.reader.read_resolved_event()?;
            let ns_uri = resolved_namespace(resolved)?;
            match event {
                Event::Start(start) => {
                    let event = self.start_element(ns_uri.as_deref(), &start)?;
                    self.pending.push_back(event);
                    return Ok(());
                }
                Event::Empty(start) => {
                    let event = self.start_element(ns_uri.as_deref(), &start)?;
                    self.pending.push_back(event);
                    self.pending.push_back(SaxEvent::EndElement);
                    return Ok(());
                }
                Event::End(_) => {
                    self.pending.push_back(SaxEvent::EndElement);
                    return Ok(());
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    if !text.is_empty() {
                        self.pending.push_back(SaxEvent::Characters(text.into_owned()));
                        return Ok(());
                    }
                }
                Event::CData(data) => {
                    let text = utf8(&data.into_inner())?;
                    self.pending.push_back(SaxEvent::Characters(text));
                    return Ok(());
                }
                Event::Eof => {
                    self.pending.push_back(SaxEvent::EndDocument);
                    self.finished = true;
                    return Ok(());
                }
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
            }
        }
    }

    fn start_element(&self, ns_uri: Option<&str>, start: &BytesStart<'_>) -> Result<SaxEvent, SniffError> {
        let local = utf8(start.local_name().as_ref())?;
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let (resolved, local) = self.reader.resolve_attribute(attr.key);
            let ns = resolved_namespace(resolved)?;
            let local = utf8(local.as_ref())?;
            let value = attr.unescape_value()?;
            attributes.push(Attribute::new(ExpandedName::new(ns.as_deref(), &local), value.into_owned()));
        }
        Ok(SaxEvent::StartElement { name: ExpandedName::new(ns_uri, &local), attributes })
    }
}

impl EventSource for XmlSource<'_> {
    fn next_event(&mut self) -> Result<Option<SaxEvent>, SniffError> {
        if !self.started {
            self.started = true;
            return Ok(Some(SaxEvent::StartDocument));
        }
        if self.pending.is_empty() && !self.finished {
            self.read_next()?;
        }
        Ok(self.pending.pop_front())
    }
}

fn resolved_namespace(resolved: ResolveResult<'_>) -> Result<Option<String>, SniffError> {
    match resolved {
        ResolveResult::Bound(ns) => utf8(ns.as_ref()).map(Some),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => {
            Err(SniffError::Xml(format!("unbound namespace prefix '{}'", String::from_utf8_lossy(&prefix))))
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<String, SniffError> {
    std::str::from_utf8(bytes).map(str::to_string).map_err(|err| SniffError::Xml(err.to_string()))
}
