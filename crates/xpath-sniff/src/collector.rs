//! Raw match storage and the minimum-hit early stop.

use std::collections::{BTreeMap, HashMap};

use crate::computed::ResultRef;
use crate::model::QueryNodeId;

/// One match of a query node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    /// Document-order index of the matched element, attribute or text chunk.
    pub order: u64,
    /// Human-readable location (`/root[1]/a[2]`, `/root[1]/@x`).
    pub location: String,
    /// Text for text hits, the value for attributes, the string value for
    /// captured elements (empty otherwise).
    pub value: String,
}

impl Hit {
    pub fn new(order: u64, location: impl Into<String>, value: impl Into<String>) -> Self {
        Self { order, location: location.into(), value: value.into() }
    }
}

/// Hits per query node plus the outputs of tracked user results.
#[derive(Debug, Default)]
pub struct MatchCollector {
    min_hits: Option<usize>,
    hits: HashMap<QueryNodeId, BTreeMap<u64, Hit>>,
    outputs: HashMap<ResultRef, usize>,
}

impl MatchCollector {
    /// `min_hits` enables the early stop; `None` never stops.
    pub fn new(min_hits: Option<usize>) -> Self {
        Self { min_hits, hits: HashMap::new(), outputs: HashMap::new() }
    }

    /// Registers a user result that must reach the minimum before an early stop.
    pub fn track(&mut self, result: ResultRef) {
        self.outputs.entry(result).or_insert(0);
    }

    /// Stores a hit. Returns `false` when `node` already has a hit at that
    /// document position (another context reached the same match).
    pub fn hit(&mut self, node: QueryNodeId, hit: Hit) -> bool {
        let hits = self.hits.entry(node).or_default();
        if hits.contains_key(&hit.order) {
            return false;
        }
        hits.insert(hit.order, hit);
        if let Some(count) = self.outputs.get_mut(&ResultRef::Query(node)) {
            *count += 1;
        }
        true
    }

    /// Counts an output of a user-given computed result.
    pub fn record_output(&mut self, result: ResultRef) {
        if let Some(count) = self.outputs.get_mut(&result) {
            *count += 1;
        }
    }

    /// True once every tracked result has at least `min_hits` outputs.
    pub fn reached_minimum(&self) -> bool {
        match self.min_hits {
            Some(min) if !self.outputs.is_empty() => self.outputs.values().all(|count| *count >= min),
            _ => false,
        }
    }

    /// Hits of `node` in document order.
    pub fn hits(&self, node: QueryNodeId) -> impl Iterator<Item = &Hit> {
        self.hits.get(&node).into_iter().flat_map(BTreeMap::values)
    }

    pub fn hit_count(&self, node: QueryNodeId) -> usize {
        self.hits.get(&node).map_or(0, BTreeMap::len)
    }

    /// Outputs recorded so far for a tracked result.
    pub fn outputs(&self, result: ResultRef) -> usize {
        self.outputs.get(&result).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_positions_are_collapsed() {
        let mut collector = MatchCollector::new(None);
        let node = QueryNodeId(1);
        assert!(collector.hit(node, Hit::new(3, "/a[1]", "")));
        assert!(!collector.hit(node, Hit::new(3, "/a[1]", "")));
        assert!(collector.hit(node, Hit::new(1, "/b[1]", "")));
        let orders: Vec<_> = collector.hits(node).map(|hit| hit.order).collect();
        assert_eq!(orders, [1, 3]);
    }

    #[test]
    fn minimum_requires_every_tracked_result() {
        let mut collector = MatchCollector::new(Some(1));
        let first = QueryNodeId(1);
        let second = QueryNodeId(2);
        collector.track(ResultRef::Query(first));
        collector.track(ResultRef::Query(second));
        collector.hit(first, Hit::new(1, "/a[1]", ""));
        assert!(!collector.reached_minimum());
        collector.hit(second, Hit::new(2, "/b[1]", ""));
        assert!(collector.reached_minimum());
    }

    #[test]
    fn no_tracked_results_never_stops() {
        let mut collector = MatchCollector::new(Some(1));
        collector.hit(QueryNodeId(1), Hit::new(1, "/a[1]", ""));
        assert!(!collector.reached_minimum());
    }
}
