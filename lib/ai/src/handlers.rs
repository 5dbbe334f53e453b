//! AI node handlers.
//!
//! Each handler reads its configuration from the node's `data`, renders
//! `{{placeholders}}` against predecessor outputs and asks the shared
//! [`LlmBackend`] for text.

use crate::backend::{LlmBackend, LlmRequest, LlmResponse};
use crate::prompt::PromptTemplate;
use async_trait::async_trait;
use nodeweave_workflow::{HandlerRegistry, NodeExecutionError, NodeHandler, NodeInputs, NodeSpec};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Upper bound on agent steps actually taken, whatever `max_steps` says.
const AGENT_STEP_LIMIT: u32 = 3;

/// Installs the `llm`, `agent` and `content` handlers.
pub fn register_ai_handlers(registry: &mut HandlerRegistry, backend: Arc<dyn LlmBackend>) {
    registry.register("llm", LlmNodeHandler::new(Arc::clone(&backend)));
    registry.register("agent", AgentNodeHandler::new(Arc::clone(&backend)));
    registry.register("content", ContentNodeHandler::new(backend));
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_agent_type() -> String {
    "general".to_string()
}

fn default_max_steps() -> u32 {
    5
}

fn default_content_type() -> String {
    "text".to_string()
}

fn default_language() -> String {
    "python".to_string()
}

fn parse_config<T: DeserializeOwned>(node: &NodeSpec) -> Result<T, NodeExecutionError> {
    serde_json::from_value(node.data.clone()).map_err(|e| NodeExecutionError::InvalidInput {
        message: format!("invalid {} configuration for node {}: {e}", node.node_type, node.id),
    })
}

fn usage_json(response: &LlmResponse) -> JsonValue {
    json!({
        "input_tokens": response.usage.input_tokens,
        "output_tokens": response.usage.output_tokens,
        "total_tokens": response.usage.total(),
    })
}

fn excerpt(text: &str) -> String {
    text.chars().take(50).collect()
}

#[derive(Debug, Deserialize)]
struct LlmNodeConfig {
    #[serde(default)]
    prompt: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f32,
}

/// Generates text from a templated prompt.
pub struct LlmNodeHandler {
    backend: Arc<dyn LlmBackend>,
}

impl LlmNodeHandler {
    /// Creates a handler backed by the given LLM.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl NodeHandler for LlmNodeHandler {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        let config: LlmNodeConfig = parse_config(node)?;
        let prompt = PromptTemplate::new(config.prompt).render_inputs(inputs);

        let request = LlmRequest::new(prompt)
            .with_model(&config.model)
            .with_provider(&config.provider)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature);
        let response = self
            .backend
            .generate(&request)
            .await
            .map_err(|e| e.into_node_error(&config.provider))?;
        tracing::debug!(
            model = %response.model,
            tokens = response.usage.total(),
            "llm node generated text"
        );

        Ok(json!({
            "model": response.model,
            "provider": config.provider,
            "generated_text": response.content,
            "finish_reason": response.finish_reason,
            "usage": usage_json(&response),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct AgentNodeConfig {
    #[serde(default)]
    goal: String,
    #[serde(default = "default_agent_type")]
    agent_type: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_max_steps")]
    max_steps: u32,
}

/// Works toward a goal in a bounded number of steps.
pub struct AgentNodeHandler {
    backend: Arc<dyn LlmBackend>,
}

impl AgentNodeHandler {
    /// Creates a handler backed by the given LLM.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl NodeHandler for AgentNodeHandler {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        let config: AgentNodeConfig = parse_config(node)?;
        let goal = PromptTemplate::new(config.goal).render_inputs(inputs);
        let system = format!("You are a {} agent. Goal: {goal}", config.agent_type);

        let mut steps = Vec::new();
        for step in 1..=config.max_steps.min(AGENT_STEP_LIMIT) {
            let action = format!("Action {step}: Performing subtask {step}");
            let request = LlmRequest::new(action.clone())
                .with_system(system.clone())
                .with_model(&config.model)
                .with_provider(&config.provider);
            let response = self
                .backend
                .generate(&request)
                .await
                .map_err(|e| e.into_node_error(&config.provider))?;

            steps.push(json!({
                "step": step,
                "thought": format!("Thinking about how to achieve the goal: {goal}"),
                "action": action,
                "result": response.content,
            }));
        }
        tracing::debug!(steps = steps.len(), agent_type = %config.agent_type, "agent node finished");

        Ok(json!({
            "agent_type": config.agent_type,
            "goal": goal,
            "model": config.model,
            "steps_taken": steps,
            "final_result": format!("Successfully completed the goal: {goal}"),
            "success": true,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ContentNodeConfig {
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    prompt: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_language")]
    language: String,
}

/// Generates text, image, code or other content.
pub struct ContentNodeHandler {
    backend: Arc<dyn LlmBackend>,
}

impl ContentNodeHandler {
    /// Creates a handler backed by the given LLM.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl NodeHandler for ContentNodeHandler {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        let config: ContentNodeConfig = parse_config(node)?;
        let prompt = PromptTemplate::new(config.prompt).render_inputs(inputs);
        let system = match config.content_type.as_str() {
            "text" => "Write text for the request.".to_string(),
            "image" => "Describe an image for the request.".to_string(),
            "code" => format!("Write {} code for the request.", config.language),
            other => format!("Produce {other} content for the request."),
        };

        let request = LlmRequest::new(prompt.clone())
            .with_system(system)
            .with_model(&config.model)
            .with_provider(&config.provider);
        let response = self
            .backend
            .generate(&request)
            .await
            .map_err(|e| e.into_node_error(&config.provider))?;

        let mut output = json!({
            "content_type": config.content_type,
            "generated_content": response.content,
        });
        if config.content_type != "text" {
            output["description"] = json!(format!(
                "{} generated for prompt: {}...",
                config.content_type,
                excerpt(&prompt)
            ));
        }
        if config.content_type == "code" {
            output["language"] = json!(config.language);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LlmProvider, SimulatedBackend};
    use crate::error::LlmError;
    use nodeweave_workflow::NodeId;

    struct Unavailable;

    #[async_trait]
    impl LlmBackend for Unavailable {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Err(LlmError::RequestFailed {
                reason: "503 from upstream".to_string(),
            })
        }

        fn provider(&self) -> LlmProvider {
            LlmProvider::OpenAi
        }

        fn model(&self) -> &str {
            "gpt-4"
        }
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::with_builtins();
        register_ai_handlers(&mut registry, Arc::new(SimulatedBackend::default()));
        registry
    }

    fn upstream() -> NodeInputs {
        let mut inputs = NodeInputs::new();
        inputs.insert(
            NodeId::from("clean"),
            json!({"processed": true, "result": "quarterly numbers"}),
        );
        inputs
    }

    #[test]
    fn registers_all_three_types() {
        let registry = registry();
        for node_type in ["llm", "agent", "content"] {
            assert!(registry.supports(node_type), "{node_type} not registered");
        }
    }

    #[tokio::test]
    async fn llm_node_renders_prompt_from_inputs() {
        let node = NodeSpec::new("summarize", "llm")
            .with_data(json!({"prompt": "Summarize {{clean}}", "model": "gpt-4o"}));

        let output = registry()
            .resolve("llm")
            .execute(&node, &upstream())
            .await
            .expect("llm node succeeds");

        assert_eq!(output["model"], "gpt-4o");
        assert_eq!(output["provider"], "openai");
        assert_eq!(
            output["generated_text"],
            "This is a mock response from OpenAI gpt-4o for prompt: Summarize quarterly numbers..."
        );
        assert_eq!(output["finish_reason"], "stop");
        assert_eq!(output["usage"]["input_tokens"], 3);
        assert_eq!(output["usage"]["total_tokens"], 53);
    }

    #[tokio::test]
    async fn llm_node_rejects_bad_config() {
        let node = NodeSpec::new("bad", "llm").with_data(json!({"max_tokens": "lots"}));
        let result = registry().resolve("llm").execute(&node, &NodeInputs::new()).await;
        assert!(matches!(result, Err(NodeExecutionError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn backend_failure_is_external_service_error() {
        let handler = LlmNodeHandler::new(Arc::new(Unavailable));
        let node = NodeSpec::new("summarize", "llm").with_data(json!({"provider": "openai"}));

        let result = handler.execute(&node, &NodeInputs::new()).await;
        assert_eq!(
            result,
            Err(NodeExecutionError::ExternalServiceError {
                service: "openai".to_string(),
                message: "LLM request failed: 503 from upstream".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn agent_caps_steps() {
        let node = NodeSpec::new("plan", "agent")
            .with_data(json!({"goal": "report on {{clean}}", "max_steps": 10}));

        let output = registry()
            .resolve("agent")
            .execute(&node, &upstream())
            .await
            .expect("agent succeeds");

        assert_eq!(output["agent_type"], "general");
        assert_eq!(output["goal"], "report on quarterly numbers");
        assert_eq!(output["steps_taken"].as_array().map(Vec::len), Some(3));
        assert_eq!(output["steps_taken"][2]["action"], "Action 3: Performing subtask 3");
        assert_eq!(
            output["final_result"],
            "Successfully completed the goal: report on quarterly numbers"
        );
        assert_eq!(output["success"], true);
    }

    #[tokio::test]
    async fn agent_respects_smaller_max_steps() {
        let node = NodeSpec::new("plan", "agent").with_data(json!({"goal": "g", "max_steps": 1}));
        let output = registry()
            .resolve("agent")
            .execute(&node, &NodeInputs::new())
            .await
            .expect("agent succeeds");
        assert_eq!(output["steps_taken"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn content_shapes_depend_on_type() {
        let registry = registry();
        let handler = registry.resolve("content");

        let text = handler
            .execute(
                &NodeSpec::new("t", "content").with_data(json!({"prompt": "hello"})),
                &NodeInputs::new(),
            )
            .await
            .expect("text content");
        assert_eq!(text["content_type"], "text");
        assert!(text.get("description").is_none());

        let code = handler
            .execute(
                &NodeSpec::new("c", "content")
                    .with_data(json!({"content_type": "code", "prompt": "fizzbuzz", "language": "rust"})),
                &NodeInputs::new(),
            )
            .await
            .expect("code content");
        assert_eq!(code["content_type"], "code");
        assert_eq!(code["language"], "rust");
        assert_eq!(code["description"], "code generated for prompt: fizzbuzz...");

        let image = handler
            .execute(
                &NodeSpec::new("i", "content")
                    .with_data(json!({"content_type": "image", "prompt": "a lighthouse"})),
                &NodeInputs::new(),
            )
            .await
            .expect("image content");
        assert_eq!(image["content_type"], "image");
        assert!(image["generated_content"].is_string());
        assert!(image.get("language").is_none());
    }
}
