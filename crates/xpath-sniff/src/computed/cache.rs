//! Per-pass values of the computed graph.
//!
//! Context-insensitive nodes keep one cache for the whole pass. Nodes owned
//! by a context-sensitive filter keep one cache per candidate instance, in
//! the filter's scope table keyed by the candidate's document order. A
//! candidate's table is evaluated and dropped when the candidate closes.
//! Attribute and text candidates close with the hit that produced them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::automaton::Context;
use crate::collector::{Hit, MatchCollector};
use crate::computed::value::string_to_number;
use crate::computed::{ComputedId, ComputedKind, ComputedNode, GraphPlan, ResultGraph, ResultKind, ResultRef, ResultValue};
use crate::error::SniffError;
use crate::model::QueryNodeId;

#[derive(Debug, Clone)]
enum Cache {
    /// Earliest hit seen by a `Stringize`.
    First(Hit),
    Exists,
    Strings(BTreeMap<u64, String>),
    Count(BTreeSet<u64>),
    /// Candidates a filter kept.
    Passed(BTreeMap<u64, Hit>),
    /// Value of a derived node, dropped whenever a member changes.
    Memo(ResultValue),
}

/// One candidate instance of a filter.
#[derive(Debug, Default)]
struct ScopeTable {
    pending: Option<Hit>,
    caches: HashMap<ComputedId, Cache>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopeKey {
    pub filter: ComputedId,
    pub order: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Global,
    Scoped(ScopeKey),
}

/// Graph topology plus the ownership facts derived from it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphView<'g> {
    pub graph: &'g ResultGraph,
    pub plan: &'g GraphPlan,
}

/// Values of every computed node during one pass.
#[derive(Debug, Default)]
pub struct GraphState {
    global: HashMap<ComputedId, Cache>,
    scopes: HashMap<ComputedId, BTreeMap<u64, ScopeTable>>,
}

impl GraphState {
    pub fn reset(&mut self) {
        self.global.clear();
        self.scopes.clear();
    }

    /// Number of candidate scopes currently open.
    pub fn open_scopes(&self) -> usize {
        self.scopes.values().map(BTreeMap::len).sum()
    }

    /// A raw query node got a new hit; `chain` is the context that produced it.
    pub(crate) fn query_hit(
        &mut self,
        view: GraphView<'_>,
        node: QueryNodeId,
        hit: &Hit,
        chain: &Context,
        collector: &mut MatchCollector,
    ) {
        for &observer in view.graph.query_observers(node) {
            self.member_hit(view, observer, ResultRef::Query(node), hit, chain, collector);
        }
    }

    fn member_hit(
        &mut self,
        view: GraphView<'_>,
        id: ComputedId,
        member: ResultRef,
        hit: &Hit,
        chain: &Context,
        collector: &mut MatchCollector,
    ) {
        let node = view.graph.node(id);
        let changed = match node.kind() {
            ComputedKind::Filter => {
                // Predicate members are read when the candidate ends.
                if node.members().first() == Some(&member) {
                    self.scopes.entry(id).or_default().entry(hit.order).or_default().pending = Some(hit.clone());
                    if view.plan.ends_on_hit(id) {
                        self.clear_results(view, ScopeKey { filter: id, order: hit.order }, chain, collector);
                    }
                }
                false
            }
            ComputedKind::Literal(_) => false,
            kind => {
                let Some(slot) = self.slot_for(view, id, chain) else {
                    return;
                };
                let caches = self.caches_mut(slot);
                match kind {
                    ComputedKind::Stringize => {
                        let earlier = matches!(caches.get(&id), Some(Cache::First(first)) if first.order <= hit.order);
                        if !earlier {
                            caches.insert(id, Cache::First(hit.clone()));
                        }
                        !earlier
                    }
                    ComputedKind::Booleanize => caches.insert(id, Cache::Exists).is_none(),
                    ComputedKind::Strings => match caches.entry(id).or_insert_with(|| Cache::Strings(BTreeMap::new())) {
                        Cache::Strings(values) => values.insert(hit.order, hit.value.clone()).is_none(),
                        _ => false,
                    },
                    ComputedKind::Count => match caches.entry(id).or_insert_with(|| Cache::Count(BTreeSet::new())) {
                        Cache::Count(orders) => orders.insert(hit.order),
                        _ => false,
                    },
                    _ => {
                        caches.remove(&id);
                        true
                    }
                }
            }
        };
        if changed {
            self.notify_observers(view, id, hit, chain, collector);
        }
    }

    fn notify_observers(
        &mut self,
        view: GraphView<'_>,
        id: ComputedId,
        hit: &Hit,
        chain: &Context,
        collector: &mut MatchCollector,
    ) {
        let node = view.graph.node(id);
        for &observer in node.observers() {
            self.member_hit(view, observer, ResultRef::Computed(id), hit, chain, collector);
        }
        if node.is_user_given() {
            collector.record_output(ResultRef::Computed(id));
        }
    }

    /// Where a notification for `id` produced under `chain` is stored.
    fn slot_for(&self, view: GraphView<'_>, id: ComputedId, chain: &Context) -> Option<Slot> {
        match view.plan.owner(id) {
            None => Some(Slot::Global),
            Some(filter) => {
                let scope = view.plan.scope_node(filter)?;
                chain.find(scope).map(|context| Slot::Scoped(ScopeKey { filter, order: context.order() }))
            }
        }
    }

    fn caches_mut(&mut self, slot: Slot) -> &mut HashMap<ComputedId, Cache> {
        match slot {
            Slot::Global => &mut self.global,
            Slot::Scoped(key) => &mut self.scopes.entry(key.filter).or_default().entry(key.order).or_default().caches,
        }
    }

    fn cache(&self, slot: Slot, id: ComputedId) -> Option<&Cache> {
        match slot {
            Slot::Global => self.global.get(&id),
            Slot::Scoped(key) => self.scopes.get(&key.filter)?.get(&key.order)?.caches.get(&id),
        }
    }

    /// A context popped: every filter scoped by its node finishes that candidate.
    pub(crate) fn ending_context(&mut self, view: GraphView<'_>, context: &Context, collector: &mut MatchCollector) {
        for &filter in view.plan.filters_scoped_by(context.node()) {
            let open = self.scopes.get(&filter).is_some_and(|tables| tables.contains_key(&context.order()));
            if open {
                self.clear_results(view, ScopeKey { filter, order: context.order() }, context, collector);
            }
        }
    }

    /// Finishes the scope `key` of its filter: a pending candidate whose
    /// predicate holds joins the filter's node-set, then every cache owned by
    /// the filter for that scope is dropped.
    pub(crate) fn clear_results(
        &mut self,
        view: GraphView<'_>,
        key: ScopeKey,
        context: &Context,
        collector: &mut MatchCollector,
    ) {
        let mut visited = HashSet::new();
        self.clear_node(view, key.filter, key, context, collector, &mut visited);
        if let Some(tables) = self.scopes.get_mut(&key.filter) {
            tables.remove(&key.order);
            if tables.is_empty() {
                self.scopes.remove(&key.filter);
            }
        }
    }

    fn clear_node(
        &mut self,
        view: GraphView<'_>,
        id: ComputedId,
        key: ScopeKey,
        context: &Context,
        collector: &mut MatchCollector,
        visited: &mut HashSet<ComputedId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let table = self.scopes.get_mut(&key.filter).and_then(|tables| tables.get_mut(&key.order));
        if id == key.filter {
            let pending = table.and_then(|table| table.pending.take());
            if let Some(hit) = pending {
                self.prepare(view, key, hit, context, collector);
            }
        } else if let Some(table) = table {
            table.caches.remove(&id);
        }
        let node = view.graph.node(id);
        for member in node.members() {
            if let ResultRef::Computed(member) = *member {
                if view.plan.owner(member) == Some(key.filter) {
                    self.clear_node(view, member, key, context, collector, visited);
                }
            }
        }
        for &observer in node.observers() {
            if view.plan.owner(observer) == Some(key.filter) {
                self.clear_node(view, observer, key, context, collector, visited);
            }
        }
    }

    /// Evaluates the predicate of a pending candidate inside its own scope.
    fn prepare(&mut self, view: GraphView<'_>, key: ScopeKey, hit: Hit, context: &Context, collector: &mut MatchCollector) {
        let node = view.graph.node(key.filter);
        let passed = match node.members().get(1) {
            Some(&predicate) => self
                .read(view, predicate, ResultKind::Boolean, Some(key), collector)
                .and_then(ResultValue::into_boolean)
                .unwrap_or(false),
            None => false,
        };
        tracing::trace!(filter = %key.filter, candidate = key.order, passed, "candidate ended");
        if !passed {
            return;
        }
        let Some(slot) = self.slot_for(view, key.filter, context) else {
            return;
        };
        let added = match self.caches_mut(slot).entry(key.filter).or_insert_with(|| Cache::Passed(BTreeMap::new())) {
            Cache::Passed(hits) => hits.insert(hit.order, hit.clone()).is_none(),
            _ => false,
        };
        if added {
            self.notify_observers(view, key.filter, &hit, context, collector);
        }
    }

    /// Reads `result` as `kind`. `scope` selects the candidate whose caches
    /// back context-sensitive nodes; without it those nodes read neutral.
    pub(crate) fn read(
        &mut self,
        view: GraphView<'_>,
        result: ResultRef,
        kind: ResultKind,
        scope: Option<ScopeKey>,
        collector: &MatchCollector,
    ) -> Result<ResultValue, SniffError> {
        let value = match result {
            ResultRef::Query(node) => ResultValue::NodeSet(collector.hits(node).cloned().collect()),
            ResultRef::Computed(id) => {
                view.graph.get(id)?;
                self.compute(view, id, scope, collector)?
            }
        };
        value.coerce(kind)
    }

    fn read_slot(view: GraphView<'_>, id: ComputedId, scope: Option<ScopeKey>) -> Option<Slot> {
        match (view.plan.owner(id), scope) {
            (None, _) => Some(Slot::Global),
            (Some(filter), Some(key)) if key.filter == filter => Some(Slot::Scoped(key)),
            _ => None,
        }
    }

    fn compute(
        &mut self,
        view: GraphView<'_>,
        id: ComputedId,
        scope: Option<ScopeKey>,
        collector: &MatchCollector,
    ) -> Result<ResultValue, SniffError> {
        let node = view.graph.node(id);
        let kind = node.kind();
        let slot = Self::read_slot(view, id, scope);
        let cache = slot.and_then(|slot| self.cache(slot, id));
        if kind.accumulates() || matches!(kind, ComputedKind::Literal(_)) {
            let value = match (kind, cache) {
                (ComputedKind::Literal(value), _) => value.clone(),
                (ComputedKind::Stringize, Some(Cache::First(hit))) => ResultValue::String(hit.value.clone()),
                (ComputedKind::Booleanize, Some(Cache::Exists)) => ResultValue::Boolean(true),
                (ComputedKind::Strings, Some(Cache::Strings(values))) => {
                    ResultValue::StringList(values.values().cloned().collect())
                }
                (ComputedKind::Count, Some(Cache::Count(orders))) => ResultValue::Number(orders.len() as f64),
                (ComputedKind::Count, _) => ResultValue::Number(0.0),
                (ComputedKind::Filter, Some(Cache::Passed(hits))) => ResultValue::NodeSet(hits.values().cloned().collect()),
                _ => ResultValue::neutral(kind.result_kind()),
            };
            return Ok(value);
        }
        if let Some(Cache::Memo(value)) = cache {
            return Ok(value.clone());
        }
        let value = self.derive(view, node, scope, collector)?;
        if let Some(slot) = slot {
            self.caches_mut(slot).insert(id, Cache::Memo(value.clone()));
        }
        Ok(value)
    }

    fn member(
        &mut self,
        view: GraphView<'_>,
        node: &ComputedNode,
        index: usize,
        kind: ResultKind,
        scope: Option<ScopeKey>,
        collector: &MatchCollector,
    ) -> Result<ResultValue, SniffError> {
        match node.members().get(index) {
            Some(&member) => self.read(view, member, kind, scope, collector),
            None => Ok(ResultValue::neutral(kind)),
        }
    }

    fn derive(
        &mut self,
        view: GraphView<'_>,
        node: &ComputedNode,
        scope: Option<ScopeKey>,
        collector: &MatchCollector,
    ) -> Result<ResultValue, SniffError> {
        let value = match node.kind() {
            ComputedKind::Convert { from, to } => self.member(view, node, 0, *from, scope, collector)?.coerce(*to)?,
            ComputedKind::Sum => {
                let values = self.member(view, node, 0, ResultKind::StringList, scope, collector)?.into_strings()?;
                ResultValue::Number(values.iter().map(|value| string_to_number(value)).sum())
            }
            ComputedKind::Concat => {
                let mut joined = String::new();
                for index in 0..node.members().len() {
                    joined.push_str(&self.member(view, node, index, ResultKind::String, scope, collector)?.into_string()?);
                }
                ResultValue::String(joined)
            }
            ComputedKind::StringLength => {
                let string = self.member(view, node, 0, ResultKind::String, scope, collector)?.into_string()?;
                ResultValue::Number(string.chars().count() as f64)
            }
            ComputedKind::Not => {
                ResultValue::Boolean(!self.member(view, node, 0, ResultKind::Boolean, scope, collector)?.into_boolean()?)
            }
            ComputedKind::And | ComputedKind::Or => {
                let all = matches!(node.kind(), ComputedKind::And);
                let mut result = all;
                for index in 0..node.members().len() {
                    let operand = self.member(view, node, index, ResultKind::Boolean, scope, collector)?.into_boolean()?;
                    if operand != all {
                        result = !all;
                        break;
                    }
                }
                ResultValue::Boolean(result)
            }
            ComputedKind::Equals => {
                let lhs = self.member(view, node, 0, ResultKind::String, scope, collector)?.into_string()?;
                let rhs = self.member(view, node, 1, ResultKind::String, scope, collector)?.into_string()?;
                ResultValue::Boolean(lhs == rhs)
            }
            ComputedKind::Compare(op) => {
                let lhs = self.member(view, node, 0, ResultKind::Number, scope, collector)?.into_number()?;
                let rhs = self.member(view, node, 1, ResultKind::Number, scope, collector)?.into_number()?;
                ResultValue::Boolean(op.apply(lhs, rhs))
            }
            kind => ResultValue::neutral(kind.result_kind()),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeTest, QueryModel};
    use std::rc::Rc;

    fn forked(parent: &Rc<Context>, node: QueryNodeId, order: u64) -> Context {
        Context::forked(node, order, parent)
    }

    #[test]
    fn derived_memo_follows_its_members() {
        let mut model = QueryModel::new();
        let a = model.path(&["r", "a"]).unwrap();
        let mut graph = ResultGraph::new();
        let count = graph.function(ComputedKind::Count, &[a.into()]).unwrap();
        let two = graph.literal(ResultValue::Number(2.0));
        let equal = graph.function(ComputedKind::Compare(crate::computed::CompareOp::Eq), &[count.into(), two.into()]).unwrap();
        let plan = graph.plan(&model);
        let view = GraphView { graph: &graph, plan: &plan };
        let mut collector = MatchCollector::new(None);
        let mut state = GraphState::default();
        let root = Rc::new(Context::root(&model));

        let read = |state: &mut GraphState, collector: &MatchCollector| {
            state.read(view, equal.into(), ResultKind::Boolean, None, collector).unwrap()
        };
        state.query_hit(view, a, &Hit::new(2, "/r[1]/a[1]", ""), &root, &mut collector);
        assert_eq!(read(&mut state, &collector), ResultValue::Boolean(false));
        state.query_hit(view, a, &Hit::new(3, "/r[1]/a[2]", ""), &root, &mut collector);
        assert_eq!(read(&mut state, &collector), ResultValue::Boolean(true));
    }

    #[test]
    fn scoped_counts_restart_per_candidate() {
        let mut model = QueryModel::new();
        let a = model.path(&["r", "a"]).unwrap();
        let b = model.child(a, NodeTest::element("b")).unwrap();
        let mut graph = ResultGraph::new();
        let count = graph.function(ComputedKind::Count, &[b.into()]).unwrap();
        let one = graph.literal(ResultValue::Number(1.0));
        let equal = graph.function(ComputedKind::Compare(crate::computed::CompareOp::Eq), &[count.into(), one.into()]).unwrap();
        let filter = graph.filter(a.into(), equal.into()).unwrap();
        let plan = graph.plan(&model);
        let view = GraphView { graph: &graph, plan: &plan };
        let mut collector = MatchCollector::new(None);
        let mut state = GraphState::default();
        let root = Rc::new(Context::root(&model));

        // <r><a><b/></a><a><b/><b/></a></r>
        let first = Rc::new(forked(&root, a, 2));
        state.query_hit(view, a, &Hit::new(2, "/r[1]/a[1]", ""), &root, &mut collector);
        state.query_hit(view, b, &Hit::new(3, "/r[1]/a[1]/b[1]", ""), &first, &mut collector);
        state.ending_context(view, &first, &mut collector);

        let second = Rc::new(forked(&root, a, 4));
        state.query_hit(view, a, &Hit::new(4, "/r[1]/a[2]", ""), &root, &mut collector);
        state.query_hit(view, b, &Hit::new(5, "/r[1]/a[2]/b[1]", ""), &second, &mut collector);
        state.query_hit(view, b, &Hit::new(6, "/r[1]/a[2]/b[2]", ""), &second, &mut collector);
        state.ending_context(view, &second, &mut collector);

        let kept = state.read(view, filter.into(), ResultKind::NodeSet, None, &collector).unwrap();
        let orders: Vec<_> = kept.into_node_set().unwrap().iter().map(|hit| hit.order).collect();
        assert_eq!(orders, [2]);
        assert_eq!(state.open_scopes(), 0);
        assert_eq!(
            state.read(view, count.into(), ResultKind::Number, None, &collector).unwrap(),
            ResultValue::Number(0.0)
        );
    }
}
