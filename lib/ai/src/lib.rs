//! AI node handlers for the nodeweave platform.
//!
//! This crate plugs three node types into the workflow handler registry:
//!
//! - **llm**: Single-shot text generation from a templated prompt
//! - **agent**: A bounded sequence of steps toward a goal
//! - **content**: Text, image, code or other content generation
//!
//! All three talk to an [`LlmBackend`]. [`SimulatedBackend`] answers
//! deterministically without any network access.

pub mod backend;
pub mod error;
pub mod handlers;
pub mod prompt;

pub use backend::{LlmBackend, LlmProvider, LlmRequest, LlmResponse, SimulatedBackend, TokenUsage};
pub use error::LlmError;
pub use handlers::{AgentNodeHandler, ContentNodeHandler, LlmNodeHandler, register_ai_handlers};
pub use prompt::PromptTemplate;
