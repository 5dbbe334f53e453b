//! LLM backend abstraction.
//!
//! Provides a unified interface for LLM providers. Node handlers only ever
//! see [`LlmBackend`]; which provider answers is a deployment decision.

use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// OpenAI API.
    OpenAi,
    /// Anthropic API.
    Anthropic,
    /// Local Ollama instance.
    Ollama,
    /// Deterministic offline responses.
    Simulated,
}

impl LlmProvider {
    /// Returns the provider tag used in node configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The prompt to send.
    pub prompt: String,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Model requested by the node; the backend's own model when absent.
    pub model: Option<String>,
    /// Provider tag requested by the node.
    pub provider: Option<String>,
    /// Temperature for sampling (0.0 - 1.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Creates a new simple request with just a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: None,
            provider: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Requests a specific model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Records the provider the node asked for.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the max tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A response from an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated content.
    pub content: String,
    /// Model that generated the response.
    pub model: String,
    /// Why generation stopped, as reported by the provider.
    pub finish_reason: Option<String>,
    /// Token usage statistics.
    pub usage: TokenUsage,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait for LLM backends.
///
/// This trait defines the interface that all LLM providers must implement.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates a response for the given request.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call fails.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Returns the provider type.
    fn provider(&self) -> LlmProvider;

    /// Returns the default model name.
    fn model(&self) -> &str;
}

/// Number of prompt characters echoed back by [`SimulatedBackend`].
const ECHO_CHARS: usize = 50;

/// Completion size reported by [`SimulatedBackend`].
const SIMULATED_OUTPUT_TOKENS: u32 = 50;

/// Offline backend that echoes the start of the prompt.
///
/// Responses depend only on the request, so workflows using AI nodes can
/// run in tests and in deployments without provider credentials.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    model: String,
}

impl SimulatedBackend {
    /// Creates a simulated backend answering as the given model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new("gpt-4")
    }
}

#[async_trait]
impl LlmBackend for SimulatedBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let provider = request.provider.as_deref().unwrap_or("simulated");
        let (label, finish_reason) = match provider {
            "openai" => ("OpenAI", "stop"),
            "anthropic" => ("Anthropic", "end_turn"),
            other => (other, "stop"),
        };
        let excerpt: String = request.prompt.chars().take(ECHO_CHARS).collect();
        let output_tokens = request
            .max_tokens
            .map_or(SIMULATED_OUTPUT_TOKENS, |max| max.min(SIMULATED_OUTPUT_TOKENS));
        let input_tokens = u32::try_from(request.prompt.split_whitespace().count()).unwrap_or(u32::MAX);

        Ok(LlmResponse {
            content: format!("This is a mock response from {label} {model} for prompt: {excerpt}..."),
            model: model.to_string(),
            finish_reason: Some(finish_reason.to_string()),
            usage: TokenUsage {
                input_tokens,
                output_tokens,
            },
        })
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::Simulated
    }

    fn model(&self) -> &str {
        &self.model
    }
}
