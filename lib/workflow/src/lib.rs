//! Workflow engine for the nodeweave platform.
//!
//! This crate provides the core workflow execution engine, including:
//!
//! - **Definitions**: The JSON shape of a workflow (`nodes` and `edges`)
//! - **Graph Model**: Validated directed graphs using petgraph
//! - **Handlers**: A registry mapping node types to executable behavior
//! - **Records**: Run and node execution records and their store contract
//! - **Scheduler**: Breadth-first execution with timeouts and cancellation

pub mod definition;
pub mod error;
pub mod execution;
pub mod graph;
pub mod handler;
pub mod scheduler;
pub mod store;

pub use definition::{EdgeSpec, NodeId, NodeSpec, WorkflowDefinition};
pub use error::{EngineError, ExecutionError, GraphError};
pub use execution::{
    ExecutionRecord, NodeExecutionRecord, NodeStatus, ParseStatusError, RunStatus, TriggerType,
};
pub use graph::WorkflowGraph;
pub use handler::{HandlerRegistry, NodeExecutionError, NodeHandler, NodeInputs};
pub use scheduler::{EngineConfig, FrontierMode, RunOutcome, WorkflowEngine};
pub use store::{InMemoryRecordStore, RecordStore, RecordStoreError, RunFilter};
