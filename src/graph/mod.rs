//! Directed dialogue graph with incoming-edge adjacency.
//!
//! Adjacency is stored as "who points to me"; outgoing edges are derived by
//! scanning registered nodes, so discovery order equals registration order.
//! A node normally has a single successor (prompt to prompt). Branching
//! happens only at "what did the user say", which is a simultaneous
//! evaluation of candidate phrases, so multi-edge fan-out is only legal
//! when every target is an Action node and the targets are aggregated into
//! an [`ActionSet`].

pub mod node;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DialogueError, Result};

pub use node::{
    CaptureNode, EngineHook, MatchNode, MessageHooks, MessageNode, MismatchNode, Node, NodeId,
    ResultsHook, TranscriptHook,
};

/// Simultaneous group of action nodes evaluated against one listening turn.
#[derive(Debug, Clone)]
pub struct ActionSet {
    members: Vec<Arc<Node>>,
}

impl ActionSet {
    /// Aggregate fan-out targets, preserving discovery order.
    pub fn new(members: Vec<Arc<Node>>) -> Self {
        Self { members }
    }

    /// Wrap a single action node.
    pub fn single(node: Arc<Node>) -> Self {
        Self {
            members: vec![node],
        }
    }

    /// Members in discovery order.
    pub fn members(&self) -> &[Arc<Node>] {
        &self.members
    }

    /// The first mismatch node in the set, if any.
    pub fn first_mismatch(&self) -> Option<Arc<Node>> {
        self.members
            .iter()
            .find(|n| matches!(n.as_ref(), Node::Mismatch(_)))
            .cloned()
    }

    /// The first capture node in the set, if any.
    pub fn capture(&self) -> Option<Arc<Node>> {
        self.members
            .iter()
            .find(|n| matches!(n.as_ref(), Node::Capture(_)))
            .cloned()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// The resolved next step from a node.
#[derive(Debug, Clone)]
pub enum NextStep {
    /// A single message successor.
    Message(Arc<Node>),
    /// One listening turn evaluated against these action nodes.
    Actions(ActionSet),
}

/// Directed graph of dialogue nodes.
#[derive(Debug, Default)]
pub struct DialogueGraph {
    /// Registered nodes, in registration order.
    nodes: Vec<Arc<Node>>,
    /// Incoming-edge lists: target id to source ids.
    incoming: HashMap<NodeId, Vec<NodeId>>,
}

impl DialogueGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, returning its id. No-op if the id is already
    /// registered.
    pub fn add_node(&mut self, node: impl Into<Node>) -> NodeId {
        let node = node.into();
        let id = node.id().to_owned();
        if !self.contains(&id) {
            self.incoming.entry(id.clone()).or_default();
            self.nodes.push(Arc::new(node));
        }
        id
    }

    /// Add an edge from `from` to `to`. Idempotent for duplicate edges.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::UnregisteredNode`] if either endpoint has
    /// not been registered.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.contains(from) {
            return Err(DialogueError::UnregisteredNode(from.to_owned()));
        }
        if !self.contains(to) {
            return Err(DialogueError::UnregisteredNode(to.to_owned()));
        }
        let sources = self.incoming.entry(to.to_owned()).or_default();
        if !sources.iter().any(|s| s == from) {
            sources.push(from.to_owned());
        }
        Ok(())
    }

    /// True if a node with this id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id() == id)
    }

    /// Look up a node by id. Linear scan.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::NodeNotFound`] if the id is absent.
    pub fn get_node(&self, id: &str) -> Result<Arc<Node>> {
        self.nodes
            .iter()
            .find(|n| n.id() == id)
            .cloned()
            .ok_or_else(|| DialogueError::NodeNotFound(id.to_owned()))
    }

    /// Resolve the next step from `current`.
    ///
    /// Returns `Ok(None)` when `current` has no outgoing edges (the
    /// dialogue ends there). A single Action successor is wrapped alone in
    /// an [`ActionSet`]; multiple successors must all be Action nodes and
    /// are merged into one set preserving discovery order.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::NodeNotFound`] if `current` is not
    /// registered, or [`DialogueError::InvalidGraphShape`] when fan-out
    /// mixes Action and non-Action targets.
    pub fn next(&self, current: &str) -> Result<Option<NextStep>> {
        if !self.contains(current) {
            return Err(DialogueError::NodeNotFound(current.to_owned()));
        }

        let outgoing: Vec<Arc<Node>> = self
            .nodes
            .iter()
            .filter(|n| {
                self.incoming
                    .get(n.id())
                    .is_some_and(|sources| sources.iter().any(|s| s == current))
            })
            .cloned()
            .collect();

        match outgoing.len() {
            0 => Ok(None),
            1 => {
                let node = outgoing.into_iter().next().ok_or_else(|| {
                    DialogueError::InvalidGraphShape("empty fan-out".to_owned())
                })?;
                if node.is_action() {
                    Ok(Some(NextStep::Actions(ActionSet::single(node))))
                } else {
                    Ok(Some(NextStep::Message(node)))
                }
            }
            _ => {
                if let Some(offender) = outgoing.iter().find(|n| !n.is_action()) {
                    return Err(DialogueError::InvalidGraphShape(format!(
                        "fan-out from '{current}' includes non-action node {offender:?}"
                    )));
                }
                Ok(Some(NextStep::Actions(ActionSet::new(outgoing))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn simple_graph() -> DialogueGraph {
        let mut graph = DialogueGraph::new();
        graph.add_node(MessageNode::new("hello").with_id("hello"));
        graph.add_node(MessageNode::new("question").with_id("question"));
        graph.add_edge("hello", "question").expect("add edge");
        graph
    }

    #[test]
    fn next_is_none_iff_no_outgoing_edges() {
        let graph = simple_graph();
        assert!(matches!(
            graph.next("hello"),
            Ok(Some(NextStep::Message(_)))
        ));
        assert!(matches!(graph.next("question"), Ok(None)));
    }

    #[test]
    fn single_action_successor_becomes_single_member_set() {
        let mut graph = simple_graph();
        graph.add_node(MatchNode::new(["yes"]).with_id("yes"));
        graph.add_edge("question", "yes").expect("add edge");

        match graph.next("question") {
            Ok(Some(NextStep::Actions(set))) => {
                assert_eq!(set.len(), 1);
                assert_eq!(set.members()[0].id(), "yes");
            }
            other => panic!("unexpected next step: {other:?}"),
        }
    }

    #[test]
    fn action_fan_out_preserves_registration_order() {
        let mut graph = simple_graph();
        graph.add_node(MatchNode::new(["yes"]).with_id("yes"));
        graph.add_node(MatchNode::new(["no"]).with_id("no"));
        graph.add_node(MismatchNode::new(2).with_id("otherwise"));
        graph.add_edge("question", "yes").expect("add edge");
        graph.add_edge("question", "no").expect("add edge");
        graph.add_edge("question", "otherwise").expect("add edge");

        match graph.next("question") {
            Ok(Some(NextStep::Actions(set))) => {
                let ids: Vec<&str> = set.members().iter().map(|n| n.id()).collect();
                assert_eq!(ids, ["yes", "no", "otherwise"]);
                assert!(set.first_mismatch().is_some());
                assert!(set.capture().is_none());
            }
            other => panic!("unexpected next step: {other:?}"),
        }
    }

    #[test]
    fn mixed_fan_out_is_invalid() {
        let mut graph = simple_graph();
        graph.add_node(MatchNode::new(["yes"]).with_id("yes"));
        graph.add_node(MessageNode::new("bye").with_id("bye"));
        graph.add_edge("question", "yes").expect("add edge");
        graph.add_edge("question", "bye").expect("add edge");

        assert!(matches!(
            graph.next("question"),
            Err(DialogueError::InvalidGraphShape(_))
        ));
    }

    #[test]
    fn edge_endpoints_must_be_registered() {
        let mut graph = simple_graph();
        assert!(matches!(
            graph.add_edge("hello", "ghost"),
            Err(DialogueError::UnregisteredNode(_))
        ));
        assert!(matches!(
            graph.add_edge("ghost", "hello"),
            Err(DialogueError::UnregisteredNode(_))
        ));
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut graph = DialogueGraph::new();
        graph.add_node(MessageNode::new("first").with_id("a"));
        graph.add_node(MessageNode::new("second").with_id("a"));

        match graph.get_node("a").expect("node present").as_ref() {
            Node::Message(m) => assert_eq!(m.text, "first"),
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut graph = simple_graph();
        graph.add_edge("hello", "question").expect("add edge");

        match graph.next("hello") {
            Ok(Some(NextStep::Message(node))) => assert_eq!(node.id(), "question"),
            other => panic!("unexpected next step: {other:?}"),
        }
    }

    #[test]
    fn get_node_missing_fails() {
        let graph = simple_graph();
        assert!(matches!(
            graph.get_node("ghost"),
            Err(DialogueError::NodeNotFound(_))
        ));
    }

    #[test]
    fn next_from_unregistered_node_fails() {
        let graph = simple_graph();
        assert!(matches!(
            graph.next("ghost"),
            Err(DialogueError::NodeNotFound(_))
        ));
    }

    #[test]
    fn capture_counts_as_action() {
        let mut graph = simple_graph();
        graph.add_node(CaptureNode::new().with_id("freeform"));
        graph.add_edge("question", "freeform").expect("add edge");

        match graph.next("question") {
            Ok(Some(NextStep::Actions(set))) => {
                assert!(set.capture().is_some());
            }
            other => panic!("unexpected next step: {other:?}"),
        }
    }
}
