//! Single-pass streaming evaluation of many XPath-like queries.
//!
//! A compiled [`QueryModel`] is matched against a stream of [`SaxEvent`]s by an
//! automaton that keeps one [`Context`](automaton::Context) per partial match.
//! Raw matches feed a [`ResultGraph`] of computed values (`string()`,
//! `count()`, comparisons, filters) that is updated incrementally, so one pass
//! over the document answers every query at once.
//!
//! ```
//! use xpath_sniff::{QueryModel, ResultGraph, SaxEvent, SniffOptions, Sniffer};
//!
//! let mut model = QueryModel::new();
//! let a = model.path(&["root", "a"]).unwrap();
//! model.mark_user_given(a).unwrap();
//! let graph = ResultGraph::new();
//!
//! let events = vec![
//!     SaxEvent::StartDocument,
//!     SaxEvent::start("root"),
//!     SaxEvent::start("a"),
//!     SaxEvent::text("1"),
//!     SaxEvent::EndElement,
//!     SaxEvent::EndElement,
//!     SaxEvent::EndDocument,
//! ];
//! let sniffer = Sniffer::new(&model, &graph, SniffOptions::default());
//! let results = sniffer.sniff(events.into_iter(), 0).unwrap();
//! assert_eq!(results.as_string(a).unwrap(), "1");
//! ```

pub mod automaton;
pub mod collector;
pub mod computed;
pub mod error;
pub mod event;
pub mod model;
pub mod options;
pub mod reader;
pub mod sniffer;
pub mod state;

pub use collector::{Hit, MatchCollector};
pub use computed::{CompareOp, ComputedId, ComputedKind, ResultGraph, ResultKind, ResultRef, ResultValue};
pub use error::SniffError;
pub use event::{Attribute, EventSource, ExpandedName, SaxEvent};
pub use model::{NameTest, NodeTest, QueryModel, QueryNodeId};
pub use options::SniffOptions;
pub use reader::XmlSource;
pub use sniffer::{SniffResults, SniffSession, Sniffer};
