//! Error taxonomy for a sniffing pass.
//!
//! Only genuine failures are errors. Missing matches and empty node-sets are
//! ordinary results (neutral values), and stopping early once enough hits were
//! collected is reported through [`SniffResults::completed`](crate::SniffResults::completed).

use thiserror::Error;

use crate::computed::ResultKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SniffError {
    /// The event source delivered events in an impossible order
    /// (e.g. more `EndElement`s than `StartElement`s). Fatal for the pass.
    #[error("event protocol violation: {0}")]
    ProtocolViolation(String),

    /// A value of kind `to` was requested from something producing `from`
    /// and no conversion between the two exists.
    #[error("cannot coerce {from} to {to}")]
    UnsupportedCoercion { from: ResultKind, to: ResultKind },

    /// More members were added to a fixed-arity computed node than it declares.
    #[error("{kind} accepts at most {arity} member(s)")]
    ArityExceeded { kind: &'static str, arity: usize },

    /// The underlying XML reader failed.
    #[error("XML input error: {0}")]
    Xml(String),

    /// A node id that does not belong to the arena it was used with.
    #[error("unknown {0}")]
    UnknownNode(String),
}

impl SniffError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub fn coercion(from: ResultKind, to: ResultKind) -> Self {
        Self::UnsupportedCoercion { from, to }
    }
}

impl From<quick_xml::Error> for SniffError {
    fn from(err: quick_xml::Error) -> Self {
        SniffError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SniffError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        SniffError::Xml(err.to_string())
    }
}
