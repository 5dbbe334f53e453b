//! Workflow definitions as stored by the service layer.
//!
//! A definition is an immutable snapshot of a graph: an ordered list of
//! typed nodes and a list of directed edges. It is deserialized from the
//! JSON document `{"nodes": [...], "edges": [...]}` and validated by
//! [`WorkflowGraph::parse`](crate::graph::WorkflowGraph::parse).

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Identifier of a node within one definition.
///
/// Node ids are chosen by whoever authored the definition, so they are
/// plain strings rather than generated ULIDs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A node as declared in a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id within the definition.
    pub id: NodeId,
    /// Type tag used to resolve the handler (`trigger`, `function`, `llm`, ...).
    #[serde(rename = "type", default)]
    pub node_type: String,
    /// Node configuration, passed to the handler untouched.
    #[serde(default = "empty_object")]
    pub data: JsonValue,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

impl NodeSpec {
    /// Creates a node with an empty configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: empty_object(),
        }
    }

    /// Sets the node configuration.
    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    /// Returns the display name from `data.name`, if set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(JsonValue::as_str)
    }
}

/// A directed dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Upstream node.
    pub source: NodeId,
    /// Downstream node.
    pub target: NodeId,
}

impl EdgeSpec {
    /// Creates an edge.
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// An immutable workflow graph definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Nodes in declaration order.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    /// Edges in declaration order.
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl WorkflowDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge.
    #[must_use]
    pub fn with_edge(mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        self.edges.push(EdgeSpec::new(source, target));
        self
    }

    /// Deserializes a definition from its stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::InvalidDefinition` if the document does not
    /// have the `{nodes, edges}` shape.
    pub fn from_json(value: &JsonValue) -> Result<Self, GraphError> {
        Self::deserialize(value).map_err(|e| GraphError::InvalidDefinition {
            reason: e.to_string(),
        })
    }

    /// Serializes the definition to its stored JSON form.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
