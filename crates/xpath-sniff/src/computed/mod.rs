//! Computed results layered on the raw structural matches.
//!
//! A [`ResultGraph`] is an arena of [`ComputedNode`]s. Members are either raw
//! query nodes or other computed nodes; every member registers its consumer
//! as an observer, so a raw hit flows upward through the graph while the
//! document streams. Members of the wrong kind are wrapped in coercion
//! adapters when they are added.
//!
//! The graph is topology only. Values live in the per-pass
//! [`GraphState`](cache::GraphState); the [`GraphPlan`] precomputes which
//! filter owns the cache of each node.

pub mod cache;
pub mod value;

use core::fmt;
use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::SniffError;
use crate::model::{QueryModel, QueryNode, QueryNodeId};

pub use value::ResultValue;

/// The five kinds of value a result can be read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    NodeSet,
    String,
    Number,
    Boolean,
    StringList,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::NodeSet => "node-set",
            ResultKind::String => "string",
            ResultKind::Number => "number",
            ResultKind::Boolean => "boolean",
            ResultKind::StringList => "string-list",
        };
        f.write_str(name)
    }
}

/// Index of a node in a [`ResultGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputedId(pub(crate) usize);

impl ComputedId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ComputedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Anything that can be a member or a user result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultRef {
    Query(QueryNodeId),
    Computed(ComputedId),
}

impl From<QueryNodeId> for ResultRef {
    fn from(id: QueryNodeId) -> Self {
        ResultRef::Query(id)
    }
}

impl From<ComputedId> for ResultRef {
    fn from(id: ComputedId) -> Self {
        ResultRef::Computed(id)
    }
}

/// Relational operator of a [`ComputedKind::Compare`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Compares two numbers; any comparison with NaN except `!=` is false.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
        }
    }
}

/// Function computed by a node.
///
/// The first four are coercion adapters inserted by [`ResultGraph::coerce`].
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedKind {
    /// First item's string value.
    Stringize,
    /// Non-empty test.
    Booleanize,
    /// Every item's string value.
    Strings,
    /// Scalar to scalar conversion.
    Convert { from: ResultKind, to: ResultKind },
    Count,
    Sum,
    Concat,
    StringLength,
    Not,
    And,
    Or,
    Equals,
    Compare(CompareOp),
    Literal(ResultValue),
    /// Candidates (member 0) whose predicate (member 1) held in their own scope.
    Filter,
}

impl ComputedKind {
    /// XPath-style name used in errors and traces.
    pub fn name(&self) -> &'static str {
        match self {
            ComputedKind::Stringize => "string",
            ComputedKind::Booleanize => "boolean",
            ComputedKind::Strings => "strings",
            ComputedKind::Convert { .. } => "convert",
            ComputedKind::Count => "count",
            ComputedKind::Sum => "sum",
            ComputedKind::Concat => "concat",
            ComputedKind::StringLength => "string-length",
            ComputedKind::Not => "not",
            ComputedKind::And => "and",
            ComputedKind::Or => "or",
            ComputedKind::Equals => "equals",
            ComputedKind::Compare(_) => "compare",
            ComputedKind::Literal(_) => "literal",
            ComputedKind::Filter => "filter",
        }
    }

    /// Kind of value this function produces.
    pub fn result_kind(&self) -> ResultKind {
        match self {
            ComputedKind::Stringize | ComputedKind::Concat => ResultKind::String,
            ComputedKind::Booleanize
            | ComputedKind::Not
            | ComputedKind::And
            | ComputedKind::Or
            | ComputedKind::Equals
            | ComputedKind::Compare(_) => ResultKind::Boolean,
            ComputedKind::Strings => ResultKind::StringList,
            ComputedKind::Convert { to, .. } => *to,
            ComputedKind::Count | ComputedKind::Sum | ComputedKind::StringLength => ResultKind::Number,
            ComputedKind::Literal(value) => value.kind(),
            ComputedKind::Filter => ResultKind::NodeSet,
        }
    }

    /// Declared member kinds; the flag marks the last entry as repeatable.
    fn signature(&self) -> (SmallVec<[ResultKind; 2]>, bool) {
        use ResultKind::{Boolean, NodeSet, Number, StringList};
        let (kinds, variable): (&[ResultKind], bool) = match self {
            ComputedKind::Convert { from, .. } => return (SmallVec::from_slice(&[*from]), false),
            ComputedKind::Stringize | ComputedKind::Booleanize | ComputedKind::Strings | ComputedKind::Count => {
                (&[NodeSet], false)
            }
            ComputedKind::Sum => (&[StringList], false),
            ComputedKind::Concat => (&[ResultKind::String], true),
            ComputedKind::StringLength => (&[ResultKind::String], false),
            ComputedKind::Not => (&[Boolean], false),
            ComputedKind::And | ComputedKind::Or => (&[Boolean], true),
            ComputedKind::Equals => (&[ResultKind::String, ResultKind::String], false),
            ComputedKind::Compare(_) => (&[Number, Number], false),
            ComputedKind::Literal(_) => (&[], false),
            ComputedKind::Filter => (&[NodeSet, Boolean], false),
        };
        (SmallVec::from_slice(kinds), variable)
    }

    /// Expected kind of member `index`, `None` past a fixed arity.
    pub fn member_kind(&self, index: usize) -> Option<ResultKind> {
        let (kinds, variable) = self.signature();
        match kinds.get(index) {
            Some(kind) => Some(*kind),
            None if variable => kinds.last().copied(),
            None => None,
        }
    }

    /// Nodes whose cache accumulates hits rather than memoizing a value derived from members.
    pub fn accumulates(&self) -> bool {
        matches!(
            self,
            ComputedKind::Stringize
                | ComputedKind::Booleanize
                | ComputedKind::Strings
                | ComputedKind::Count
                | ComputedKind::Filter
        )
    }
}

/// A function applied to member results, plus the nodes observing it.
#[derive(Debug, Clone)]
pub struct ComputedNode {
    kind: ComputedKind,
    members: SmallVec<[ResultRef; 2]>,
    observers: SmallVec<[ComputedId; 2]>,
    user_given: bool,
}

impl ComputedNode {
    fn new(kind: ComputedKind) -> Self {
        Self { kind, members: SmallVec::new(), observers: SmallVec::new(), user_given: false }
    }

    pub fn kind(&self) -> &ComputedKind {
        &self.kind
    }

    /// Inputs in argument order, already coerced to the kinds the function expects.
    pub fn members(&self) -> &[ResultRef] {
        &self.members
    }

    /// Nodes notified when this node's value changes.
    pub fn observers(&self) -> &[ComputedId] {
        &self.observers
    }

    pub fn is_user_given(&self) -> bool {
        self.user_given
    }

    pub fn is_filter(&self) -> bool {
        matches!(self.kind, ComputedKind::Filter)
    }
}

/// Arena of computed nodes layered over a [`QueryModel`](crate::QueryModel).
#[derive(Debug, Clone, Default)]
pub struct ResultGraph {
    nodes: Vec<ComputedNode>,
    query_observers: HashMap<QueryNodeId, SmallVec<[ComputedId; 2]>>,
}

impl ResultGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Panics when `id` belongs to another graph; see [`ResultGraph::get`].
    pub fn node(&self, id: ComputedId) -> &ComputedNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: ComputedId) -> Result<&ComputedNode, SniffError> {
        self.nodes.get(id.0).ok_or_else(|| SniffError::UnknownNode(format!("computed node {id}")))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (ComputedId, &ComputedNode)> {
        self.nodes.iter().enumerate().map(|(idx, node)| (ComputedId(idx), node))
    }

    /// Computed nodes fed directly by a raw query node, in registration order.
    pub fn query_observers(&self, node: QueryNodeId) -> &[ComputedId] {
        self.query_observers.get(&node).map_or(&[], |observers| observers.as_slice())
    }

    /// Kind produced by a member or result.
    pub fn kind_of(&self, result: ResultRef) -> Result<ResultKind, SniffError> {
        match result {
            ResultRef::Query(_) => Ok(ResultKind::NodeSet),
            ResultRef::Computed(id) => Ok(self.get(id)?.kind.result_kind()),
        }
    }

    /// Adds a node without members.
    pub fn add(&mut self, kind: ComputedKind) -> ComputedId {
        let id = ComputedId(self.nodes.len());
        self.nodes.push(ComputedNode::new(kind));
        id
    }

    /// Adds `kind` with `members`, coercing each as needed.
    pub fn function(&mut self, kind: ComputedKind, members: &[ResultRef]) -> Result<ComputedId, SniffError> {
        let id = self.add(kind);
        for member in members {
            self.add_member(id, *member, None)?;
        }
        Ok(id)
    }

    /// Adds a constant.
    pub fn literal(&mut self, value: ResultValue) -> ComputedId {
        self.add(ComputedKind::Literal(value))
    }

    /// `candidate[predicate]`. The predicate is coerced to a boolean.
    pub fn filter(&mut self, candidate: ResultRef, predicate: ResultRef) -> Result<ComputedId, SniffError> {
        self.function(ComputedKind::Filter, &[candidate, predicate])
    }

    /// Marks a node as a result the caller reads; its updates count toward the early stop.
    pub fn mark_user_given(&mut self, id: ComputedId) -> Result<(), SniffError> {
        self.get(id)?;
        self.nodes[id.0].user_given = true;
        Ok(())
    }

    /// Appends a member to `node`.
    ///
    /// `filter`, when given, is an existing filter over `candidate`; it is
    /// added in place of the raw candidate.
    pub fn add_member(
        &mut self,
        node: ComputedId,
        candidate: ResultRef,
        filter: Option<ComputedId>,
    ) -> Result<(), SniffError> {
        let target = self.get(node)?;
        let index = target.members.len();
        let expected = target.kind.member_kind(index).ok_or_else(|| SniffError::ArityExceeded {
            kind: target.kind.name(),
            arity: target.kind.signature().0.len(),
        })?;
        let member = self.view(candidate, filter)?;
        let member = if self.kind_of(member)? == expected { member } else { self.coerce(member, expected)? };
        self.attach(node, member);
        Ok(())
    }

    /// Returns a result of kind `to` for `member`, inserting adapters when the kinds differ.
    pub fn coerce(&mut self, member: ResultRef, to: ResultKind) -> Result<ResultRef, SniffError> {
        let from = self.kind_of(member)?;
        if from == to {
            return Ok(member);
        }
        let adapter = match (from, to) {
            (ResultKind::NodeSet, ResultKind::String) => ComputedKind::Stringize,
            (ResultKind::NodeSet, ResultKind::Boolean) => ComputedKind::Booleanize,
            (ResultKind::NodeSet, ResultKind::StringList) => ComputedKind::Strings,
            (ResultKind::NodeSet, ResultKind::Number) => {
                let string = self.coerce(member, ResultKind::String)?;
                return self.coerce(string, ResultKind::Number);
            }
            (ResultKind::String | ResultKind::Number | ResultKind::Boolean, ResultKind::StringList) => {
                return Ok(member);
            }
            (
                ResultKind::String | ResultKind::Number | ResultKind::Boolean,
                ResultKind::String | ResultKind::Number | ResultKind::Boolean,
            ) => ComputedKind::Convert { from, to },
            _ => return Err(SniffError::coercion(from, to)),
        };
        let id = self.add(adapter);
        self.attach(id, member);
        Ok(ResultRef::Computed(id))
    }

    fn view(&self, candidate: ResultRef, filter: Option<ComputedId>) -> Result<ResultRef, SniffError> {
        let Some(filter) = filter else {
            return Ok(candidate);
        };
        let node = self.get(filter)?;
        if !node.is_filter() || node.members.first() != Some(&candidate) {
            return Err(SniffError::UnknownNode(format!("filter {filter} over {candidate:?}")));
        }
        Ok(ResultRef::Computed(filter))
    }

    fn attach(&mut self, node: ComputedId, member: ResultRef) {
        self.nodes[node.0].members.push(member);
        match member {
            ResultRef::Query(query) => self.query_observers.entry(query).or_default().push(node),
            ResultRef::Computed(id) => self.nodes[id.0].observers.push(node),
        }
    }

    /// Raw query node a filter's candidates are instances of.
    pub fn scope_node(&self, filter: ComputedId) -> Option<QueryNodeId> {
        let mut current = self.nodes.get(filter.0)?;
        loop {
            if !current.is_filter() {
                return None;
            }
            match current.members.first()? {
                ResultRef::Query(query) => return Some(*query),
                ResultRef::Computed(id) => current = self.nodes.get(id.0)?,
            }
        }
    }

    /// True when the predicate of `filter` depends on nodes below its scope node.
    pub fn is_context_sensitive(&self, model: &QueryModel, filter: ComputedId) -> bool {
        let Some(scope) = self.scope_node(filter) else {
            return false;
        };
        let Some(predicate) = self.nodes.get(filter.0).and_then(|node| node.members.get(1)) else {
            return false;
        };
        let mut pending = vec![*predicate];
        let mut seen = Vec::new();
        while let Some(result) = pending.pop() {
            if seen.contains(&result) {
                continue;
            }
            seen.push(result);
            match result {
                ResultRef::Query(query) if model.is_below(query, scope) => return true,
                ResultRef::Query(_) => {}
                ResultRef::Computed(id) => pending.extend(self.nodes[id.0].members.iter().copied()),
            }
        }
        false
    }

    /// Filter owning the cache of `node`, if the node varies per candidate.
    ///
    /// Walks first observers upward. Reaching a filter through its candidate
    /// slot keeps walking; reaching one through its predicate slot stops, and
    /// that filter owns the node when it is context-sensitive.
    pub fn owner(&self, model: &QueryModel, node: ComputedId) -> Option<ComputedId> {
        let mut current = node;
        for _ in 0..self.nodes.len() {
            let observer = *self.nodes.get(current.0)?.observers.first()?;
            let observed = &self.nodes[observer.0];
            if observed.is_filter() && observed.members.get(1) == Some(&ResultRef::Computed(current)) {
                return self.is_context_sensitive(model, observer).then_some(observer);
            }
            current = observer;
        }
        None
    }

    /// Precomputes cache ownership for a pass over `model`.
    pub fn plan(&self, model: &QueryModel) -> GraphPlan {
        let owners = (0..self.nodes.len()).map(|idx| self.owner(model, ComputedId(idx))).collect();
        let mut filters_by_scope: HashMap<QueryNodeId, Vec<ComputedId>> = HashMap::new();
        let mut scope_nodes = Vec::with_capacity(self.nodes.len());
        let mut leaf_scoped = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.nodes() {
            let scope = if node.is_filter() { self.scope_node(id) } else { None };
            if let Some(scope) = scope {
                filters_by_scope.entry(scope).or_default().push(id);
            }
            scope_nodes.push(scope);
            leaf_scoped.push(scope.and_then(|scope| model.get(scope).ok()).is_some_and(QueryNode::is_leaf));
        }
        GraphPlan { owners, scope_nodes, leaf_scoped, filters_by_scope }
    }
}

/// Per-graph facts the caches need on every notification.
#[derive(Debug, Clone, Default)]
pub struct GraphPlan {
    owners: Vec<Option<ComputedId>>,
    scope_nodes: Vec<Option<QueryNodeId>>,
    leaf_scoped: Vec<bool>,
    filters_by_scope: HashMap<QueryNodeId, Vec<ComputedId>>,
}

impl GraphPlan {
    /// Filter owning the cache of `node`, see [`ResultGraph::owner`].
    pub fn owner(&self, node: ComputedId) -> Option<ComputedId> {
        self.owners.get(node.0).copied().flatten()
    }

    /// Query node whose matches are the candidates of `filter`.
    pub fn scope_node(&self, filter: ComputedId) -> Option<QueryNodeId> {
        self.scope_nodes.get(filter.0).copied().flatten()
    }

    /// True when the candidates of `filter` are attribute or text hits. Those
    /// never open a context, so each candidate ends with its own hit.
    pub fn ends_on_hit(&self, filter: ComputedId) -> bool {
        self.leaf_scoped.get(filter.0).copied().unwrap_or(false)
    }

    /// Filters whose candidates end when a context pinned to `node` pops, in creation order.
    pub fn filters_scoped_by(&self, node: QueryNodeId) -> &[ComputedId] {
        self.filters_by_scope.get(&node).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeTest;

    #[test]
    fn node_set_to_number_goes_through_string() {
        let mut model = QueryModel::new();
        let x = model.path(&["root", "@x"]).unwrap();
        let mut graph = ResultGraph::new();
        let number = graph.coerce(x.into(), ResultKind::Number).unwrap();
        let ResultRef::Computed(number) = number else { panic!("expected an adapter") };
        assert_eq!(graph.node(number).kind(), &ComputedKind::Convert { from: ResultKind::String, to: ResultKind::Number });
        let ResultRef::Computed(string) = graph.node(number).members()[0] else { panic!("expected an adapter") };
        assert_eq!(graph.node(string).kind(), &ComputedKind::Stringize);
        assert_eq!(graph.query_observers(x), &[string]);
    }

    #[test]
    fn fixed_arity_is_enforced() {
        let mut graph = ResultGraph::new();
        let one = graph.literal(ResultValue::Boolean(true));
        let not = graph.function(ComputedKind::Not, &[one.into()]).unwrap();
        assert_eq!(
            graph.add_member(not, one.into(), None),
            Err(SniffError::ArityExceeded { kind: "not", arity: 1 })
        );
        let and = graph.function(ComputedKind::And, &[one.into(), one.into(), one.into()]).unwrap();
        assert_eq!(graph.node(and).members().len(), 3);
    }

    #[test]
    fn string_list_cannot_become_a_number() {
        let mut graph = ResultGraph::new();
        let list = graph.literal(ResultValue::StringList(vec![]));
        assert_eq!(
            graph.function(ComputedKind::Count, &[list.into()]),
            Err(SniffError::coercion(ResultKind::StringList, ResultKind::NodeSet))
        );
    }

    #[test]
    fn predicate_below_scope_is_owned_by_the_filter() {
        let mut model = QueryModel::new();
        let a = model.path(&["root", "a"]).unwrap();
        let b = model.child(a, NodeTest::element("b")).unwrap();
        let flag = model.path(&["root", "flag"]).unwrap();
        let mut graph = ResultGraph::new();

        let count = graph.function(ComputedKind::Count, &[b.into()]).unwrap();
        let two = graph.literal(ResultValue::Number(2.0));
        let equal = graph.function(ComputedKind::Compare(CompareOp::Eq), &[count.into(), two.into()]).unwrap();
        let sensitive = graph.filter(a.into(), equal.into()).unwrap();
        let global = graph.filter(a.into(), flag.into()).unwrap();

        assert_eq!(graph.scope_node(sensitive), Some(a));
        assert!(graph.is_context_sensitive(&model, sensitive));
        assert!(!graph.is_context_sensitive(&model, global));
        assert_eq!(graph.owner(&model, count), Some(sensitive));
        assert_eq!(graph.owner(&model, equal), Some(sensitive));
        assert_eq!(graph.owner(&model, sensitive), None);
        let plan = graph.plan(&model);
        assert_eq!(plan.filters_scoped_by(a), &[sensitive, global]);
    }

    #[test]
    fn filter_replaces_its_candidate_as_member() {
        let mut model = QueryModel::new();
        let a = model.path(&["a"]).unwrap();
        let b = model.child(a, NodeTest::element("b")).unwrap();
        let mut graph = ResultGraph::new();
        let filter = graph.filter(a.into(), b.into()).unwrap();
        let count = graph.add(ComputedKind::Count);
        graph.add_member(count, a.into(), Some(filter)).unwrap();
        assert_eq!(graph.node(count).members(), &[ResultRef::Computed(filter)]);
        assert_eq!(graph.node(filter).observers(), &[count]);
    }
}
