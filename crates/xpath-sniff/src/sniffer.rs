//! Drives the automaton and the computed graph over one document.
//!
//! A [`Sniffer`] borrows an immutable [`QueryModel`] and [`ResultGraph`] and
//! can run any number of passes. Each pass owns fresh state: the frontier,
//! structural trackers, the collector and the graph caches.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::automaton::{Context, ElementEvent, Frontier, HitSink, Matched};
use crate::collector::{Hit, MatchCollector};
use crate::computed::cache::{GraphState, GraphView};
use crate::computed::{GraphPlan, ResultGraph, ResultKind, ResultRef, ResultValue};
use crate::error::SniffError;
use crate::event::{Attribute, EventSource, ExpandedName, SaxEvent};
use crate::model::{QueryModel, QueryNodeId};
use crate::options::SniffOptions;
use crate::state::{NamePath, PositionCounters, TextAccumulator};

/// Evaluates a query model and its computed graph over documents, one pass at a time.
pub struct Sniffer<'q> {
    model: &'q QueryModel,
    graph: &'q ResultGraph,
    plan: GraphPlan,
    options: SniffOptions,
    /// Query nodes whose hits are kept: user results and members of the computed graph.
    retained: Vec<bool>,
    tracked: Vec<ResultRef>,
}

impl<'q> Sniffer<'q> {
    /// Plans cache ownership for `graph` once; every pass reuses the plan.
    pub fn new(model: &'q QueryModel, graph: &'q ResultGraph, options: SniffOptions) -> Self {
        let plan = graph.plan(model);
        let retained = model
            .nodes()
            .map(|(id, node)| node.is_user_given() || !graph.query_observers(id).is_empty())
            .collect();
        let mut tracked: Vec<ResultRef> =
            model.nodes().filter(|(_, node)| node.is_user_given()).map(|(id, _)| id.into()).collect();
        tracked.extend(graph.nodes().filter(|(_, node)| node.is_user_given()).map(|(id, _)| ResultRef::from(id)));
        Self { model, graph, plan, options, retained, tracked }
    }

    pub fn options(&self) -> &SniffOptions {
        &self.options
    }

    /// Runs one pass, stopping once every user result has `min_hits` hits
    /// (`0` reads the whole document).
    pub fn sniff(&self, source: impl EventSource, min_hits: usize) -> Result<SniffResults<'_>, SniffError> {
        self.run(source, (min_hits > 0).then_some(min_hits))
    }

    /// Runs one pass with the early stop configured in [`SniffOptions`].
    pub fn sniff_with_options(&self, source: impl EventSource) -> Result<SniffResults<'_>, SniffError> {
        self.run(source, self.options.min_hits())
    }

    /// Push-style pass for callers that own the event loop.
    pub fn session(&self) -> SniffSession<'_> {
        self.session_with(self.options.min_hits())
    }

    fn session_with(&self, min_hits: Option<usize>) -> SniffSession<'_> {
        let mut collector = MatchCollector::new(min_hits);
        for result in &self.tracked {
            collector.track(*result);
        }
        let view = GraphView { graph: self.graph, plan: &self.plan };
        SniffSession {
            model: self.model,
            trace: self.options.trace(),
            frontier: Frontier::new(self.model),
            recorder: Recorder {
                view,
                retained: &self.retained,
                capture_text: self.options.capture_text(),
                positions: PositionCounters::default(),
                names: NamePath::default(),
                text: TextAccumulator::default(),
                captures: Vec::new(),
                collector,
                state: GraphState::default(),
                last_order: 0,
                element_order: 0,
                text_order: 0,
            },
            phase: Phase::Idle,
            stopped: false,
        }
    }

    fn run(&self, mut source: impl EventSource, min_hits: Option<usize>) -> Result<SniffResults<'_>, SniffError> {
        let mut session = self.session_with(min_hits);
        while !session.is_done() {
            match source.next_event()? {
                Some(event) => session.handle(event)?,
                None => break,
            }
        }
        session.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Open,
    Ended,
}

/// An element whose string value is still being collected.
#[derive(Debug)]
struct Capture {
    node: QueryNodeId,
    order: u64,
    depth: usize,
    location: String,
    value: String,
    scope: Rc<Context>,
}

/// Receives automaton output and turns it into hits.
struct Recorder<'s> {
    view: GraphView<'s>,
    retained: &'s [bool],
    capture_text: bool,
    positions: PositionCounters,
    names: NamePath,
    text: TextAccumulator,
    captures: Vec<Capture>,
    collector: MatchCollector,
    state: GraphState,
    last_order: u64,
    element_order: u64,
    text_order: u64,
}

impl Recorder<'_> {
    /// Reserves `count` consecutive document-order indices and returns the first.
    fn advance(&mut self, count: usize) -> u64 {
        let first = self.last_order + 1;
        self.last_order += count as u64;
        first
    }

    fn is_retained(&self, node: QueryNodeId) -> bool {
        self.retained.get(node.index()).copied().unwrap_or(false)
    }

    fn is_captured(&self, node: QueryNodeId) -> bool {
        self.capture_text && self.is_retained(node)
    }

    fn record(&mut self, node: QueryNodeId, hit: Hit, scope: &Context) {
        if self.collector.hit(node, hit.clone()) {
            self.state.query_hit(self.view, node, &hit, scope, &mut self.collector);
        }
    }

    /// Records the captured elements closing at the current depth.
    fn complete_captures(&mut self) {
        let depth = self.positions.depth();
        let (done, open): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.captures).into_iter().partition(|capture| capture.depth == depth);
        self.captures = open;
        for capture in done {
            self.record(capture.node, Hit::new(capture.order, capture.location, capture.value), &capture.scope);
        }
    }
}

impl HitSink for Recorder<'_> {
    fn hit(&mut self, node: QueryNodeId, matched: Matched<'_>, scope: &Rc<Context>) {
        // Intermediate steps only drive the automaton.
        if !self.is_retained(node) {
            return;
        }
        let hit = match matched {
            Matched::Element if self.is_captured(node) => {
                let order = self.element_order;
                if !self.captures.iter().any(|capture| capture.node == node && capture.order == order) {
                    self.captures.push(Capture {
                        node,
                        order,
                        depth: self.positions.depth(),
                        location: self.names.location(),
                        value: String::new(),
                        scope: Rc::clone(scope),
                    });
                }
                return;
            }
            Matched::Element => Hit::new(self.element_order, self.names.location(), ""),
            Matched::Text(text) => Hit::new(self.text_order, self.names.location(), text),
            Matched::Attribute { index, attribute } => Hit::new(
                self.element_order + 1 + index as u64,
                self.names.attribute_location(&attribute.name),
                attribute.value.clone(),
            ),
        };
        self.record(node, hit, scope);
    }

    fn ending_context(&mut self, context: &Context) {
        self.state.ending_context(self.view, context, &mut self.collector);
    }
}

/// One pass fed event by event.
pub struct SniffSession<'s> {
    model: &'s QueryModel,
    trace: bool,
    frontier: Frontier,
    recorder: Recorder<'s>,
    phase: Phase,
    stopped: bool,
}

impl<'s> SniffSession<'s> {
    /// True once the document ended or enough hits were collected.
    pub fn is_done(&self) -> bool {
        self.stopped || self.phase == Phase::Ended
    }

    /// Dispatches one pulled event to the matching push method.
    pub fn handle(&mut self, event: SaxEvent) -> Result<(), SniffError> {
        match event {
            SaxEvent::StartDocument => self.start_document(),
            SaxEvent::StartElement { name, attributes } => self.start_element(&name, &attributes),
            SaxEvent::Characters(text) => self.characters(&text),
            SaxEvent::EndElement => self.end_element(),
            SaxEvent::EndDocument => self.end_document(),
        }
    }

    /// Once the pass stopped early, this and every other push method ignores
    /// its event: the rest of the document cannot change the results.
    pub fn start_document(&mut self) -> Result<(), SniffError> {
        if self.stopped {
            return Ok(());
        }
        if self.phase != Phase::Idle {
            return Err(SniffError::protocol("start document received twice"));
        }
        self.phase = Phase::Open;
        debug!(contexts = self.frontier.len(), "sniffing pass started");
        Ok(())
    }

    pub fn start_element(&mut self, name: &ExpandedName, attributes: &[Attribute]) -> Result<(), SniffError> {
        if self.stopped {
            return Ok(());
        }
        self.expect_open("start element")?;
        self.flush_text();
        let position = self.recorder.positions.push(name);
        self.recorder.names.push(name, position.named);
        let order = self.recorder.advance(1 + attributes.len());
        self.recorder.element_order = order;
        let element = ElementEvent { name, position, order };
        self.frontier.start_element(self.model, element, attributes, &mut self.recorder);
        self.after_event("start element");
        Ok(())
    }

    pub fn characters(&mut self, text: &str) -> Result<(), SniffError> {
        if self.stopped {
            return Ok(());
        }
        self.expect_open("characters")?;
        // Text outside the document element is not part of any result.
        if self.recorder.positions.depth() > 0 {
            self.recorder.text.append(text);
        }
        Ok(())
    }

    pub fn end_element(&mut self) -> Result<(), SniffError> {
        if self.stopped {
            return Ok(());
        }
        self.expect_open("end element")?;
        if self.recorder.positions.depth() == 0 {
            return Err(SniffError::protocol("end element without matching start element"));
        }
        self.flush_text();
        self.recorder.complete_captures();
        self.frontier.end_element(&mut self.recorder);
        self.recorder.positions.pop()?;
        self.recorder.names.pop();
        self.after_event("end element");
        Ok(())
    }

    /// Fails while elements are still open.
    pub fn end_document(&mut self) -> Result<(), SniffError> {
        if self.stopped {
            return Ok(());
        }
        self.expect_open("end document")?;
        let open = self.recorder.positions.depth();
        if open > 0 {
            return Err(SniffError::protocol(format!("end document with {open} open element(s)")));
        }
        self.recorder.text.reset();
        self.phase = Phase::Ended;
        Ok(())
    }

    /// Ends the pass. A session that was neither stopped early nor saw the
    /// end of the document is a protocol violation.
    pub fn finish(self) -> Result<SniffResults<'s>, SniffError> {
        let completed = self.phase == Phase::Ended;
        if !completed && !self.stopped {
            return Err(SniffError::protocol("event source ended before end of document"));
        }
        debug!(
            completed,
            max_frontier = self.frontier.max_len(),
            open_scopes = self.recorder.state.open_scopes(),
            "sniffing pass finished"
        );
        Ok(SniffResults {
            view: self.recorder.view,
            collector: self.recorder.collector,
            state: RefCell::new(self.recorder.state),
            completed,
            max_frontier: self.frontier.max_len(),
        })
    }

    fn expect_open(&self, event: &str) -> Result<(), SniffError> {
        match self.phase {
            Phase::Open => Ok(()),
            Phase::Idle => Err(SniffError::protocol(format!("{event} before start document"))),
            Phase::Ended => Err(SniffError::protocol(format!("{event} after end document"))),
        }
    }

    /// Matches the text collected since the last element boundary.
    fn flush_text(&mut self) {
        if self.recorder.text.is_empty() {
            return;
        }
        let text = self.recorder.text.drain_and_reset();
        self.recorder.text_order = self.recorder.advance(1);
        for capture in &mut self.recorder.captures {
            capture.value.push_str(&text);
        }
        self.frontier.match_text(self.model, &text, &mut self.recorder);
    }

    fn after_event(&mut self, event: &str) {
        if self.trace {
            trace!(event, frontier = %self.frontier, "frontier");
        }
        if self.recorder.collector.reached_minimum() {
            self.stopped = true;
            debug!(event, order = self.recorder.last_order, "minimum hits reached, stopping early");
        }
    }
}

/// Everything one pass produced.
#[derive(Debug)]
pub struct SniffResults<'s> {
    view: GraphView<'s>,
    collector: MatchCollector,
    state: RefCell<GraphState>,
    completed: bool,
    max_frontier: usize,
}

impl SniffResults<'_> {
    /// Raw hits of `node` in document order. Only user-given nodes and nodes
    /// read by the computed graph keep their hits; other steps report none.
    pub fn hits(&self, node: QueryNodeId) -> impl Iterator<Item = &Hit> {
        self.collector.hits(node)
    }

    /// Number of hits kept for `node`.
    pub fn hit_count(&self, node: QueryNodeId) -> usize {
        self.collector.hit_count(node)
    }

    /// Outputs recorded for a user result (hits for query nodes, updates for computed nodes).
    pub fn outputs(&self, result: impl Into<ResultRef>) -> usize {
        self.collector.outputs(result.into())
    }

    pub fn kind(&self, result: impl Into<ResultRef>) -> Result<ResultKind, SniffError> {
        self.view.graph.kind_of(result.into())
    }

    /// Reads `result` as `kind`. Values that only exist inside a filter candidate read neutral.
    pub fn value(&self, result: impl Into<ResultRef>, kind: ResultKind) -> Result<ResultValue, SniffError> {
        self.state.borrow_mut().read(self.view, result.into(), kind, None, &self.collector)
    }

    pub fn as_string(&self, result: impl Into<ResultRef>) -> Result<String, SniffError> {
        self.value(result, ResultKind::String)?.into_string()
    }

    pub fn as_number(&self, result: impl Into<ResultRef>) -> Result<f64, SniffError> {
        self.value(result, ResultKind::Number)?.into_number()
    }

    pub fn as_boolean(&self, result: impl Into<ResultRef>) -> Result<bool, SniffError> {
        self.value(result, ResultKind::Boolean)?.into_boolean()
    }

    pub fn as_strings(&self, result: impl Into<ResultRef>) -> Result<Vec<String>, SniffError> {
        self.value(result, ResultKind::StringList)?.into_strings()
    }

    pub fn node_set(&self, result: impl Into<ResultRef>) -> Result<Vec<Hit>, SniffError> {
        self.value(result, ResultKind::NodeSet)?.into_node_set()
    }

    /// False when the pass stopped early and only covers a prefix of the document.
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Largest number of simultaneously live contexts.
    pub fn max_frontier(&self) -> usize {
        self.max_frontier
    }
}
