//! Compiled query graph consumed by the automaton.
//!
//! A [`QueryModel`] is an arena of [`QueryNode`]s rooted at [`QueryModel::root`].
//! Each node carries a node test, child steps (structural continuation) and
//! constraints (predicates tried once the node itself matched). An XPath
//! compiler builds the model through the methods below; the automaton only
//! reads it.
//!
//! Descendant steps (`//x`) are expressed with a [`NodeTest::Descendant`] node:
//! it matches every element, absorbs the whole subtree it entered and re-tests
//! its constraints against every element inside. [`QueryModel::descendant_step`]
//! performs the required wiring.

use core::fmt;
use smallvec::SmallVec;
use string_cache::DefaultAtom;

use crate::error::SniffError;
use crate::event::ExpandedName;
use crate::state::SiblingPosition;

/// Index of a node in a [`QueryModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryNodeId(pub(crate) usize);

impl QueryNodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for QueryNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Name part of an element or attribute test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    /// `*`
    Any,
    /// `prefix:*`
    Namespace(DefaultAtom),
    Exact(ExpandedName),
}

impl NameTest {
    pub fn local(local: &str) -> Self {
        NameTest::Exact(ExpandedName::local(local))
    }

    pub fn qualified(ns_uri: &str, local: &str) -> Self {
        NameTest::Exact(ExpandedName::new(Some(ns_uri), local))
    }

    pub fn namespace(ns_uri: &str) -> Self {
        NameTest::Namespace(DefaultAtom::from(ns_uri))
    }

    pub fn matches(&self, name: &ExpandedName) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Namespace(ns) => name.ns_uri.as_ref() == Some(ns),
            NameTest::Exact(expected) => expected == name,
        }
    }

    /// The sibling position this test is counted against for `[n]` predicates.
    fn position_in(&self, position: &SiblingPosition) -> u32 {
        match self {
            NameTest::Any => position.any,
            NameTest::Namespace(_) => position.in_namespace,
            NameTest::Exact(_) => position.named,
        }
    }
}

/// What a query node matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// The document node. Matches nothing; only anchors absolute paths.
    Root,
    Element { name: NameTest, position: Option<u32> },
    Text,
    Attribute { name: NameTest },
    /// `descendant-or-self::node()`; consumable.
    Descendant,
}

impl NodeTest {
    pub fn element(local: &str) -> Self {
        NodeTest::Element { name: NameTest::local(local), position: None }
    }

    pub fn element_at(local: &str, position: u32) -> Self {
        NodeTest::Element { name: NameTest::local(local), position: Some(position) }
    }

    pub fn attribute(local: &str) -> Self {
        NodeTest::Attribute { name: NameTest::local(local) }
    }

    fn is_element_like(&self) -> bool {
        matches!(self, NodeTest::Element { .. } | NodeTest::Descendant)
    }
}

/// One step of a compiled query.
#[derive(Debug, Clone)]
pub struct QueryNode {
    test: NodeTest,
    parent: Option<QueryNodeId>,
    children: SmallVec<[QueryNodeId; 4]>,
    constraints: SmallVec<[QueryNodeId; 2]>,
    user_given: bool,
}

impl QueryNode {
    fn new(test: NodeTest, parent: Option<QueryNodeId>) -> Self {
        Self { test, parent, children: SmallVec::new(), constraints: SmallVec::new(), user_given: false }
    }

    pub fn test(&self) -> &NodeTest {
        &self.test
    }

    pub fn parent(&self) -> Option<QueryNodeId> {
        self.parent
    }

    pub fn children(&self) -> &[QueryNodeId] {
        &self.children
    }

    pub fn constraints(&self) -> &[QueryNodeId] {
        &self.constraints
    }

    pub fn is_user_given(&self) -> bool {
        self.user_given
    }

    /// True when an element named `name` at `position` among its siblings satisfies this step.
    pub fn matches_element(&self, name: &ExpandedName, position: &SiblingPosition) -> bool {
        match &self.test {
            NodeTest::Element { name: test, position: expected } => {
                test.matches(name) && expected.is_none_or(|expected| expected == test.position_in(position))
            }
            NodeTest::Descendant => true,
            NodeTest::Root | NodeTest::Text | NodeTest::Attribute { .. } => false,
        }
    }

    /// True for text and descendant steps, given non-empty text.
    pub fn matches_text(&self, text: &str) -> bool {
        !text.is_empty() && matches!(self.test, NodeTest::Text | NodeTest::Descendant)
    }

    /// True for an attribute step whose name test accepts `name`.
    pub fn matches_attribute(&self, name: &ExpandedName, _value: &str) -> bool {
        match &self.test {
            NodeTest::Attribute { name: test } => test.matches(name),
            _ => false,
        }
    }

    /// Whether a match absorbs the whole subtree below it (see [`NodeTest::Descendant`]).
    pub fn consumable(&self) -> bool {
        matches!(self.test, NodeTest::Descendant)
    }

    /// True for steps that match elements and therefore open contexts.
    pub fn is_element(&self) -> bool {
        self.test.is_element_like()
    }

    /// Attribute and text steps: complete as soon as they match, nothing lies below them.
    pub fn is_leaf(&self) -> bool {
        matches!(self.test, NodeTest::Text | NodeTest::Attribute { .. })
    }
}

/// Arena of query nodes. Node 0 is the document root.
#[derive(Debug, Clone)]
pub struct QueryModel {
    nodes: Vec<QueryNode>,
}

impl Default for QueryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryModel {
    pub fn new() -> Self {
        Self { nodes: vec![QueryNode::new(NodeTest::Root, None)] }
    }

    pub fn root(&self) -> QueryNodeId {
        QueryNodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Panics when `id` belongs to another model; see [`QueryModel::get`].
    pub fn node(&self, id: QueryNodeId) -> &QueryNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: QueryNodeId) -> Result<&QueryNode, SniffError> {
        self.nodes.get(id.0).ok_or_else(|| SniffError::UnknownNode(format!("query node {id}")))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (QueryNodeId, &QueryNode)> {
        self.nodes.iter().enumerate().map(|(idx, node)| (QueryNodeId(idx), node))
    }

    fn push(&mut self, test: NodeTest, parent: QueryNodeId) -> Result<QueryNodeId, SniffError> {
        self.get(parent)?;
        let id = QueryNodeId(self.nodes.len());
        self.nodes.push(QueryNode::new(test, Some(parent)));
        Ok(id)
    }

    /// Adds a structural step below `parent`.
    pub fn child(&mut self, parent: QueryNodeId, test: NodeTest) -> Result<QueryNodeId, SniffError> {
        let id = self.push(test, parent)?;
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Adds a predicate node below `parent`; it is only tried where `parent` matched.
    pub fn constraint(&mut self, parent: QueryNodeId, test: NodeTest) -> Result<QueryNodeId, SniffError> {
        let id = self.push(test, parent)?;
        self.nodes[parent.0].constraints.push(id);
        Ok(id)
    }

    /// Returns the descendant node below `parent`, creating it on first use.
    pub fn descendant(&mut self, parent: QueryNodeId) -> Result<QueryNodeId, SniffError> {
        let existing = self
            .get(parent)?
            .children
            .iter()
            .copied()
            .find(|child| matches!(self.nodes[child.0].test, NodeTest::Descendant));
        match existing {
            Some(id) => Ok(id),
            None => self.child(parent, NodeTest::Descendant),
        }
    }

    /// Adds `parent//test`.
    ///
    /// Element tests become constraints of the descendant node. Text and
    /// attribute tests are registered as both a child (seen while absorbing)
    /// and a constraint (seen directly by the anchoring step) of one node.
    pub fn descendant_step(&mut self, parent: QueryNodeId, test: NodeTest) -> Result<QueryNodeId, SniffError> {
        let descendant = self.descendant(parent)?;
        let element = test.is_element_like();
        let id = self.constraint(descendant, test)?;
        if !element {
            self.nodes[descendant.0].children.push(id);
        }
        Ok(id)
    }

    /// Marks a node as a result the caller reads (counts toward early stop,
    /// captures element text).
    pub fn mark_user_given(&mut self, id: QueryNodeId) -> Result<(), SniffError> {
        self.get(id)?;
        self.nodes[id.0].user_given = true;
        Ok(())
    }

    /// Convenience for absolute child paths: `/a/b/c` → `path(&["a", "b", "c"])`.
    pub fn path(&mut self, steps: &[&str]) -> Result<QueryNodeId, SniffError> {
        let mut current = self.root();
        for step in steps {
            current = match step.strip_prefix('@') {
                Some(attribute) => self.child(current, NodeTest::attribute(attribute))?,
                None if *step == "text()" => self.child(current, NodeTest::Text)?,
                None if *step == "*" => self.child(current, NodeTest::Element { name: NameTest::Any, position: None })?,
                None => self.child(current, NodeTest::element(step))?,
            };
        }
        Ok(current)
    }

    /// True when `node` lies strictly below `ancestor` (through children or constraints).
    pub fn is_below(&self, node: QueryNodeId, ancestor: QueryNodeId) -> bool {
        let mut current = self.nodes.get(node.0).and_then(QueryNode::parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(named: u32, any: u32) -> SiblingPosition {
        SiblingPosition { named, in_namespace: any, any }
    }

    #[test]
    fn element_test_honours_position() {
        let mut model = QueryModel::new();
        let first = model.child(model.root(), NodeTest::element_at("a", 1)).unwrap();
        let node = model.node(first);
        assert!(node.matches_element(&ExpandedName::local("a"), &pos(1, 3)));
        assert!(!node.matches_element(&ExpandedName::local("a"), &pos(2, 3)));
        assert!(!node.matches_element(&ExpandedName::local("b"), &pos(1, 1)));
    }

    #[test]
    fn any_position_counts_all_siblings() {
        let mut model = QueryModel::new();
        let second = model.child(model.root(), NodeTest::Element { name: NameTest::Any, position: Some(2) }).unwrap();
        assert!(model.node(second).matches_element(&ExpandedName::local("x"), &pos(1, 2)));
    }

    #[test]
    fn descendant_step_wires_text_as_child_and_constraint() {
        let mut model = QueryModel::new();
        let text = model.descendant_step(model.root(), NodeTest::Text).unwrap();
        let element = model.descendant_step(model.root(), NodeTest::element("a")).unwrap();
        let descendant = model.node(model.root()).children()[0];
        assert_eq!(model.node(model.root()).children().len(), 1);
        assert!(model.node(descendant).consumable());
        assert_eq!(model.node(descendant).children(), &[text]);
        assert_eq!(model.node(descendant).constraints(), &[text, element]);
        assert!(model.is_below(element, model.root()));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut model = QueryModel::new();
        assert!(matches!(model.child(QueryNodeId(42), NodeTest::Text), Err(SniffError::UnknownNode(_))));
    }
}
