//! Core domain types and utilities for the nodeweave platform.
//!
//! This crate provides the identifier types and the error handling
//! foundation shared by the engine and the service layer.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{NodeExecutionId, ParseIdError, WorkflowId, WorkflowRunId, WorkflowVersionId};
