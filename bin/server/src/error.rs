//! Domain error types for server operations.
//!
//! Repository and engine errors convert into [`ApiError`], which decides
//! the HTTP status and hides internal details from clients. Startup
//! failures are reported as [`StartupError`] inside a rootcause `Report`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nodeweave_workflow::{EngineError, GraphError, RecordStoreError};
use std::fmt;

/// Workflow catalog errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Workflow was not found.
    NotFound { id: String },
    /// Workflow version was not found.
    VersionNotFound { id: String },
    /// Database error while accessing workflows.
    DatabaseError { details: String },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "workflow '{id}' not found"),
            Self::VersionNotFound { id } => write!(f, "workflow version '{id}' not found"),
            Self::DatabaseError { details } => {
                write!(f, "workflow database error: {details}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<sqlx::Error> for WorkflowError {
    fn from(e: sqlx::Error) -> Self {
        Self::DatabaseError {
            details: e.to_string(),
        }
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The addressed resource does not exist.
    NotFound { resource: &'static str, id: String },
    /// The request is malformed or not allowed in the current state.
    BadRequest { message: String },
    /// Something failed on our side.
    Internal { details: String },
}

impl ApiError {
    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { resource, id } => write!(f, "{resource} '{id}' not found"),
            Self::BadRequest { message } => write!(f, "{message}"),
            Self::Internal { details } => write!(f, "internal error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound { resource, .. } => {
                let mut resource = resource.to_string();
                if let Some(first) = resource.get_mut(..1) {
                    first.make_ascii_uppercase();
                }
                (StatusCode::NOT_FOUND, format!("{resource} not found"))
            }
            Self::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            Self::Internal { details } => {
                tracing::error!("Internal error: {}", details);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound { id } => Self::NotFound {
                resource: "workflow",
                id,
            },
            WorkflowError::VersionNotFound { id } => Self::NotFound {
                resource: "workflow version",
                id,
            },
            WorkflowError::DatabaseError { details } => Self::Internal { details },
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<RecordStoreError> for ApiError {
    fn from(e: RecordStoreError) -> Self {
        Self::Internal {
            details: e.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::RunNotFound { run_id } => Self::NotFound {
                resource: "execution",
                id: run_id.to_string(),
            },
            EngineError::RunNotPending { .. } | EngineError::RunNotCancellable { .. } => {
                Self::bad_request(e.to_string())
            }
            EngineError::RecordStore(inner) => inner.into(),
        }
    }
}

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// Could not connect to the database.
    Database { details: String },
    /// Migrations failed to apply.
    Migration { details: String },
    /// Could not bind the listener.
    Bind { addr: String, details: String },
    /// The server stopped with an error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::Database { details } => write!(f, "failed to connect to database: {details}"),
            Self::Migration { details } => write!(f, "failed to run migrations: {details}"),
            Self::Bind { addr, details } => write!(f, "failed to bind to {addr}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeweave_core::WorkflowRunId;
    use nodeweave_workflow::RunStatus;

    #[test]
    fn engine_errors_map_to_client_errors() {
        let run_id = WorkflowRunId::new();
        assert!(matches!(
            ApiError::from(EngineError::RunNotFound { run_id }),
            ApiError::NotFound {
                resource: "execution",
                ..
            }
        ));

        let err = ApiError::from(EngineError::RunNotPending {
            run_id,
            status: RunStatus::Completed,
        });
        match err {
            ApiError::BadRequest { message } => assert!(message.contains("completed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn store_failures_are_internal() {
        let err = ApiError::from(EngineError::RecordStore(RecordStoreError::WriteFailed {
            message: "disk full".to_string(),
        }));
        assert!(matches!(err, ApiError::Internal { .. }));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_status() {
        let err: ApiError = WorkflowError::NotFound {
            id: "wf_x".to_string(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn startup_error_display() {
        let err = StartupError::Bind {
            addr: "0.0.0.0:3000".to_string(),
            details: "address in use".to_string(),
        };
        assert_eq!(err.to_string(), "failed to bind to 0.0.0.0:3000: address in use");
    }
}
