//! Node handler registry.
//!
//! Every node type maps to one [`NodeHandler`]. The scheduler resolves a
//! handler by the node's type tag and calls `execute` with the node's
//! configuration and the outputs of its predecessors. Types nobody
//! registered resolve to [`UnsupportedNodeHandler`], which fails the node
//! instead of the engine.

use crate::definition::{NodeId, NodeSpec};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Outputs of a node's predecessors, keyed by predecessor id.
pub type NodeInputs = BTreeMap<NodeId, JsonValue>;

/// Trait for node execution.
///
/// Implementations must not rely on being called in any particular order
/// relative to other nodes of the same frontier.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Executes a node with the given inputs.
    ///
    /// Returns the output as JSON.
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError>;
}

/// Errors from node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeExecutionError {
    /// Input validation failed.
    InvalidInput { message: String },
    /// Execution failed.
    ExecutionFailed { message: String },
    /// Node type not supported.
    UnsupportedNodeType { node_type: String },
    /// External service error.
    ExternalServiceError { service: String, message: String },
    /// The handler did not finish within the node timeout.
    Timeout { after: Duration },
}

impl std::fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::ExecutionFailed { message } => write!(f, "execution failed: {message}"),
            Self::UnsupportedNodeType { node_type } => {
                write!(f, "unsupported node type: {node_type}")
            }
            Self::ExternalServiceError { service, message } => {
                write!(f, "external service error ({service}): {message}")
            }
            Self::Timeout { after } => write!(f, "execution timed out after {after:?}"),
        }
    }
}

impl std::error::Error for NodeExecutionError {}

/// Maps node type tags to handlers.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    fallback: Arc<dyn NodeHandler>,
}

impl HandlerRegistry {
    /// Creates a registry with no handlers; every type is unsupported.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(UnsupportedNodeHandler),
        }
    }

    /// Creates a registry with the built-in `trigger`, `function`,
    /// `condition` and `action` handlers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("trigger", TriggerHandler);
        registry.register("function", FunctionHandler);
        registry.register("condition", ConditionHandler);
        registry.register("action", ActionHandler);
        registry
    }

    /// Registers a handler, replacing any previous handler for the type.
    pub fn register(&mut self, node_type: impl Into<String>, handler: impl NodeHandler + 'static) {
        self.register_arc(node_type, Arc::new(handler));
    }

    /// Registers a shared handler.
    pub fn register_arc(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    /// Returns the handler for a type, or the unsupported-type handler.
    #[must_use]
    pub fn resolve(&self, node_type: &str) -> Arc<dyn NodeHandler> {
        self.handlers
            .get(node_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Returns true if a handler is registered for the type.
    #[must_use]
    pub fn supports(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// Returns the registered type tags, sorted.
    #[must_use]
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

/// Fallback for types with no registered handler.
pub struct UnsupportedNodeHandler;

#[async_trait]
impl NodeHandler for UnsupportedNodeHandler {
    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        Err(NodeExecutionError::UnsupportedNodeType {
            node_type: node.node_type.clone(),
        })
    }
}

/// Passes its own configuration through; inputs are ignored.
pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        Ok(node.data.clone())
    }
}

/// Placeholder transform: reports which node processed the data.
pub struct FunctionHandler;

#[async_trait]
impl NodeHandler for FunctionHandler {
    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        Ok(serde_json::json!({
            "processed": true,
            "timestamp": Utc::now().to_rfc3339(),
            "result": format!("Processed data from {}", node.name().unwrap_or("unknown")),
        }))
    }
}

/// Boolean decision. Downstream nodes run regardless of the outcome.
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        let result = match node.data.get("condition") {
            None | Some(JsonValue::Null) => true,
            Some(JsonValue::Bool(value)) => *value,
            Some(other) => {
                return Err(NodeExecutionError::InvalidInput {
                    message: format!("condition must be a boolean, got {other}"),
                });
            }
        };
        Ok(serde_json::json!({ "condition_result": result }))
    }
}

/// Terminal side effect; reports success.
pub struct ActionHandler;

#[async_trait]
impl NodeHandler for ActionHandler {
    async fn execute(
        &self,
        _node: &NodeSpec,
        _inputs: &NodeInputs,
    ) -> Result<JsonValue, NodeExecutionError> {
        Ok(serde_json::json!({ "action": "completed", "success": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(JsonValue);

    #[async_trait]
    impl NodeHandler for Fixed {
        async fn execute(
            &self,
            _node: &NodeSpec,
            _inputs: &NodeInputs,
        ) -> Result<JsonValue, NodeExecutionError> {
            Ok(self.0.clone())
        }
    }

    fn inputs_from(entries: &[(&str, JsonValue)]) -> NodeInputs {
        entries
            .iter()
            .map(|(id, value)| (NodeId::from(*id), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn trigger_passes_config_through() {
        let node = NodeSpec::new("t", "trigger")
            .with_data(json!({"name": "Start", "cron": "0 7 * * *"}));
        let handler = HandlerRegistry::with_builtins().resolve("trigger");

        let output = handler
            .execute(&node, &inputs_from(&[("x", json!(1))]))
            .await
            .expect("trigger succeeds");
        assert_eq!(output, node.data);
    }

    #[tokio::test]
    async fn function_names_its_node() {
        let registry = HandlerRegistry::with_builtins();
        let named = NodeSpec::new("f", "function").with_data(json!({"name": "Clean"}));
        let unnamed = NodeSpec::new("g", "function");

        let output = registry
            .resolve("function")
            .execute(&named, &NodeInputs::new())
            .await
            .expect("function succeeds");
        assert_eq!(output["processed"], true);
        assert_eq!(output["result"], "Processed data from Clean");
        assert!(output["timestamp"].is_string());

        let output = registry
            .resolve("function")
            .execute(&unnamed, &NodeInputs::new())
            .await
            .expect("function succeeds");
        assert_eq!(output["result"], "Processed data from unknown");
    }

    #[tokio::test]
    async fn condition_defaults_to_true() {
        let registry = HandlerRegistry::with_builtins();
        let handler = registry.resolve("condition");

        let default = handler
            .execute(&NodeSpec::new("c", "condition"), &NodeInputs::new())
            .await
            .expect("condition succeeds");
        assert_eq!(default, json!({"condition_result": true}));

        let explicit = handler
            .execute(
                &NodeSpec::new("c", "condition").with_data(json!({"condition": false})),
                &NodeInputs::new(),
            )
            .await
            .expect("condition succeeds");
        assert_eq!(explicit, json!({"condition_result": false}));
    }

    #[tokio::test]
    async fn condition_rejects_non_boolean() {
        let handler = HandlerRegistry::with_builtins().resolve("condition");
        let node = NodeSpec::new("c", "condition").with_data(json!({"condition": "yes"}));

        let result = handler.execute(&node, &NodeInputs::new()).await;
        assert!(matches!(result, Err(NodeExecutionError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn action_reports_success() {
        let handler = HandlerRegistry::with_builtins().resolve("action");
        let output = handler
            .execute(&NodeSpec::new("a", "action"), &NodeInputs::new())
            .await
            .expect("action succeeds");
        assert_eq!(output, json!({"action": "completed", "success": true}));
    }

    #[tokio::test]
    async fn unknown_type_resolves_to_unsupported() {
        let registry = HandlerRegistry::with_builtins();
        assert!(!registry.supports("teleport"));

        let node = NodeSpec::new("x", "teleport");
        let result = registry.resolve("teleport").execute(&node, &NodeInputs::new()).await;
        assert_eq!(
            result,
            Err(NodeExecutionError::UnsupportedNodeType {
                node_type: "teleport".to_string()
            })
        );
    }

    #[tokio::test]
    async fn register_replaces_existing_handler() {
        let mut registry = HandlerRegistry::with_builtins();
        registry.register("action", Fixed(json!("custom")));

        let output = registry
            .resolve("action")
            .execute(&NodeSpec::new("a", "action"), &NodeInputs::new())
            .await
            .expect("custom handler succeeds");
        assert_eq!(output, json!("custom"));
    }

    #[test]
    fn empty_registry_supports_nothing() {
        let registry = HandlerRegistry::new();
        assert!(registry.node_types().is_empty());
        assert_eq!(
            HandlerRegistry::with_builtins().node_types(),
            vec!["action", "condition", "function", "trigger"]
        );
    }

    #[test]
    fn error_display() {
        let err = NodeExecutionError::ExternalServiceError {
            service: "openai".to_string(),
            message: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "external service error (openai): rate limited");
        let err = NodeExecutionError::Timeout {
            after: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("timed out"));
    }
}
