//! Workflow graph model using petgraph.
//!
//! A [`WorkflowGraph`] is the validated, queryable form of a
//! [`WorkflowDefinition`]: nodes are graph vertices, edges are plain
//! dependencies. The scheduler only ever reads it.

use crate::definition::{NodeId, NodeSpec, WorkflowDefinition};
use crate::error::GraphError;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeSet, HashMap};

/// A parsed workflow graph.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// The underlying directed graph. Node indices follow declaration order.
    graph: DiGraph<NodeSpec, ()>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Builds a graph from a definition.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The definition has no nodes
    /// - A node id is declared twice
    /// - An edge references a node id that is not declared
    pub fn parse(definition: &WorkflowDefinition) -> Result<Self, GraphError> {
        if definition.nodes.is_empty() {
            return Err(GraphError::EmptyDefinition);
        }

        let mut graph = DiGraph::with_capacity(definition.nodes.len(), definition.edges.len());
        let mut node_index_map = HashMap::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            if node_index_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
            let index = graph.add_node(node.clone());
            node_index_map.insert(node.id.clone(), index);
        }

        for edge in &definition.edges {
            let lookup = |id: &NodeId| {
                node_index_map
                    .get(id)
                    .copied()
                    .ok_or_else(|| GraphError::UnknownEdgeEndpoint {
                        source: edge.source.clone(),
                        target: edge.target.clone(),
                        missing: id.clone(),
                    })
            };
            let source_index = lookup(&edge.source)?;
            let target_index = lookup(&edge.target)?;
            graph.add_edge(source_index, target_index, ());
        }

        Ok(Self {
            graph,
            node_index_map,
        })
    }

    /// Returns a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&NodeSpec> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns nodes that have no incoming edges, in declaration order.
    ///
    /// An empty result on a non-empty graph means every node sits on or
    /// behind a cycle.
    pub fn start_nodes(&self) -> Vec<&NodeSpec> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns the directly downstream node ids, in edge declaration order.
    ///
    /// A target reached by several parallel edges is listed once.
    pub fn successors(&self, node_id: &NodeId) -> Vec<&NodeId> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        // petgraph walks adjacency lists newest-first.
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .collect();
        edges.sort_by_key(|edge| edge.id());

        let mut seen = BTreeSet::new();
        edges
            .into_iter()
            .filter_map(|edge| self.graph.node_weight(edge.target()))
            .map(|node| &node.id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Returns the set of directly upstream node ids.
    pub fn predecessors(&self, node_id: &NodeId) -> BTreeSet<&NodeId> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return BTreeSet::new();
        };

        self.graph
            .edges_directed(index, Direction::Incoming)
            .filter_map(|edge| self.graph.node_weight(edge.source()))
            .map(|node| &node.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> WorkflowDefinition {
        WorkflowDefinition::new()
            .with_node(NodeSpec::new("start", "trigger"))
            .with_node(NodeSpec::new("left", "function"))
            .with_node(NodeSpec::new("right", "function"))
            .with_node(NodeSpec::new("join", "action"))
            .with_edge("start", "left")
            .with_edge("start", "right")
            .with_edge("left", "join")
            .with_edge("right", "join")
    }

    fn ids<'a>(nodes: impl IntoIterator<Item = &'a NodeId>) -> Vec<&'a str> {
        nodes.into_iter().map(NodeId::as_str).collect()
    }

    #[test]
    fn parse_builds_graph() {
        let graph = WorkflowGraph::parse(&diamond()).expect("should parse");
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(
            graph.get_node(&NodeId::from("join")).map(|n| n.node_type.as_str()),
            Some("action")
        );
    }

    #[test]
    fn parse_rejects_empty_definition() {
        let result = WorkflowGraph::parse(&WorkflowDefinition::new());
        assert!(matches!(result, Err(GraphError::EmptyDefinition)));
    }

    #[test]
    fn parse_rejects_duplicate_ids() {
        let def = WorkflowDefinition::new()
            .with_node(NodeSpec::new("a", "trigger"))
            .with_node(NodeSpec::new("a", "action"));

        match WorkflowGraph::parse(&def) {
            Err(GraphError::DuplicateNodeId { node_id }) => assert_eq!(node_id.as_str(), "a"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_dangling_edge() {
        let def = WorkflowDefinition::new()
            .with_node(NodeSpec::new("a", "trigger"))
            .with_edge("a", "ghost");

        match WorkflowGraph::parse(&def) {
            Err(GraphError::UnknownEdgeEndpoint { missing, .. }) => {
                assert_eq!(missing.as_str(), "ghost");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn start_nodes_have_no_incoming_edges() {
        let def = WorkflowDefinition::new()
            .with_node(NodeSpec::new("a", "trigger"))
            .with_node(NodeSpec::new("b", "trigger"))
            .with_node(NodeSpec::new("c", "action"))
            .with_edge("a", "c")
            .with_edge("b", "c");
        let graph = WorkflowGraph::parse(&def).expect("should parse");

        let starts: Vec<&str> = graph.start_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(starts, vec!["a", "b"]);
    }

    #[test]
    fn pure_cycle_has_no_start_nodes() {
        let def = WorkflowDefinition::new()
            .with_node(NodeSpec::new("a", "function"))
            .with_node(NodeSpec::new("b", "function"))
            .with_edge("a", "b")
            .with_edge("b", "a");
        let graph = WorkflowGraph::parse(&def).expect("cycles are structurally valid");
        assert!(graph.start_nodes().is_empty());
    }

    #[test]
    fn successors_follow_declaration_order() {
        let def = WorkflowDefinition::new()
            .with_node(NodeSpec::new("a", "trigger"))
            .with_node(NodeSpec::new("z", "action"))
            .with_node(NodeSpec::new("m", "action"))
            .with_node(NodeSpec::new("b", "action"))
            .with_edge("a", "z")
            .with_edge("a", "m")
            .with_edge("a", "b")
            .with_edge("a", "z");
        let graph = WorkflowGraph::parse(&def).expect("should parse");

        assert_eq!(ids(graph.successors(&NodeId::from("a"))), vec!["z", "m", "b"]);
        assert!(graph.successors(&NodeId::from("b")).is_empty());
    }

    #[test]
    fn predecessors_are_a_set() {
        let graph = WorkflowGraph::parse(&diamond()).expect("should parse");
        assert_eq!(
            ids(graph.predecessors(&NodeId::from("join"))),
            vec!["left", "right"]
        );
        assert!(graph.predecessors(&NodeId::from("start")).is_empty());
        assert!(graph.predecessors(&NodeId::from("missing")).is_empty());
    }
}
