//! Error types for the AI crate.

use nodeweave_workflow::NodeExecutionError;
use std::fmt;
use std::time::Duration;

/// Errors from LLM backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Provider is unavailable.
    ProviderUnavailable { provider: String, reason: String },
    /// Request failed.
    RequestFailed { reason: String },
    /// Response parsing failed.
    ResponseParseFailed { reason: String },
    /// Timeout waiting for response.
    Timeout { after: Duration },
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl LlmError {
    /// Converts into the node-level error reported for the given provider.
    #[must_use]
    pub fn into_node_error(self, provider: &str) -> NodeExecutionError {
        match self {
            Self::Timeout { after } => NodeExecutionError::Timeout { after },
            Self::InvalidConfig { reason } => NodeExecutionError::InvalidInput { message: reason },
            Self::ResponseParseFailed { .. } => NodeExecutionError::ExecutionFailed {
                message: self.to_string(),
            },
            Self::ProviderUnavailable {
                provider: ref unavailable,
                ..
            } => {
                NodeExecutionError::ExternalServiceError {
                    service: unavailable.clone(),
                    message: self.to_string(),
                }
            }
            Self::RequestFailed { .. } | Self::RateLimited { .. } => {
                NodeExecutionError::ExternalServiceError {
                    service: provider.to_string(),
                    message: self.to_string(),
                }
            }
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "LLM provider '{provider}' unavailable: {reason}")
            }
            Self::RequestFailed { reason } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::Timeout { after } => write!(f, "LLM request timed out after {after:?}"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}
