//! Database repositories for the nodeweave server.
//!
//! This module provides data access for:
//! - Workflows and their immutable versions
//! - Execution and node execution records (the engine's record store)

pub mod execution;
pub mod workflow;

pub use execution::PgRecordStore;
pub use workflow::{
    InMemoryWorkflowCatalog, WorkflowCatalog, WorkflowRecord, WorkflowRepository,
    WorkflowVersionRecord,
};

/// Wraps a column value that failed to parse as a decode error.
fn decode_error(what: &str, value: &str, e: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {what} '{value}': {e}"),
    )))
}
