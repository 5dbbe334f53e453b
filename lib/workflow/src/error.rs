//! Error types for the workflow crate.
//!
//! Errors are split by how far they reach:
//! - `GraphError`: the definition is malformed; detected before any node runs
//! - `NodeExecutionError` (in [`crate::handler`]): a single handler failed
//! - `ExecutionError`: why a run ended `failed`; stored as the run's error text
//! - `EngineError`: infrastructure problems returned to the caller of the engine

use crate::definition::NodeId;
use crate::execution::RunStatus;
use crate::store::RecordStoreError;
use nodeweave_core::WorkflowRunId;
use std::fmt;

/// A workflow definition that cannot be turned into a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The definition has no nodes.
    EmptyDefinition,
    /// Two nodes share the same id.
    DuplicateNodeId { node_id: NodeId },
    /// An edge references a node id that is not defined.
    UnknownEdgeEndpoint {
        source: NodeId,
        target: NodeId,
        missing: NodeId,
    },
    /// The document is not a `{nodes, edges}` definition.
    InvalidDefinition { reason: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDefinition => write!(f, "malformed definition: no nodes defined"),
            Self::DuplicateNodeId { node_id } => {
                write!(f, "malformed definition: duplicate node id '{node_id}'")
            }
            Self::UnknownEdgeEndpoint {
                source,
                target,
                missing,
            } => {
                write!(
                    f,
                    "malformed definition: edge {source} -> {target} references unknown node '{missing}'"
                )
            }
            Self::InvalidDefinition { reason } => {
                write!(f, "malformed definition: {reason}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// The reason a run finished in the `failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The definition could not be parsed.
    Malformed(GraphError),
    /// Every node has an incoming edge, so nothing can start.
    NoStartNodes,
    /// Nodes remain but none of them has all predecessors executed.
    CycleDetected { unprocessed: Vec<NodeId> },
    /// A node handler failed; later nodes were not started.
    NodeFailed { node_id: NodeId, reason: String },
    /// The engine could not persist progress and abandoned the run.
    Interrupted { reason: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "{e}"),
            Self::NoStartNodes => {
                write!(f, "workflow has no start nodes (every node has an incoming edge)")
            }
            Self::CycleDetected { unprocessed } => {
                let ids: Vec<&str> = unprocessed.iter().map(NodeId::as_str).collect();
                write!(f, "workflow contains a cycle among nodes: {}", ids.join(", "))
            }
            Self::NodeFailed { node_id, reason } => {
                write!(f, "failed to execute node {node_id}: {reason}")
            }
            Self::Interrupted { reason } => write!(f, "run interrupted: {reason}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<GraphError> for ExecutionError {
    fn from(e: GraphError) -> Self {
        Self::Malformed(e)
    }
}

/// Errors returned by the engine itself, as opposed to run failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No execution record exists for the run.
    RunNotFound { run_id: WorkflowRunId },
    /// The run has already been started or finished.
    RunNotPending {
        run_id: WorkflowRunId,
        status: RunStatus,
    },
    /// Only pending or running runs can be cancelled.
    RunNotCancellable {
        run_id: WorkflowRunId,
        status: RunStatus,
    },
    /// The record store rejected a read or write.
    RecordStore(RecordStoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::RunNotPending { run_id, status } => {
                write!(f, "run {run_id} is already in {status} state")
            }
            Self::RunNotCancellable { run_id, status } => {
                write!(f, "cannot cancel run {run_id} with status: {status}")
            }
            Self::RecordStore(e) => write!(f, "record store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RecordStoreError> for EngineError {
    fn from(e: RecordStoreError) -> Self {
        Self::RecordStore(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let err = GraphError::DuplicateNodeId {
            node_id: NodeId::from("a"),
        };
        assert!(err.to_string().contains("duplicate node id 'a'"));
        assert!(err.to_string().starts_with("malformed definition"));
    }

    #[test]
    fn unknown_endpoint_names_missing_node() {
        let err = GraphError::UnknownEdgeEndpoint {
            source: NodeId::from("a"),
            target: NodeId::from("ghost"),
            missing: NodeId::from("ghost"),
        };
        assert!(err.to_string().contains("unknown node 'ghost'"));
    }

    #[test]
    fn cycle_error_lists_nodes() {
        let err = ExecutionError::CycleDetected {
            unprocessed: vec![NodeId::from("b"), NodeId::from("c")],
        };
        assert_eq!(err.to_string(), "workflow contains a cycle among nodes: b, c");
    }

    #[test]
    fn malformed_execution_error_uses_graph_text() {
        let err: ExecutionError = GraphError::EmptyDefinition.into();
        assert_eq!(err.to_string(), "malformed definition: no nodes defined");
    }

    #[test]
    fn engine_error_display() {
        let run_id = WorkflowRunId::new();
        let err = EngineError::RunNotPending {
            run_id,
            status: RunStatus::Completed,
        };
        assert!(err.to_string().contains("already in completed state"));
    }
}
