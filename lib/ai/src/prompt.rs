//! Prompt templates.
//!
//! Placeholders use `{{variable_name}}` syntax. Inside a workflow the
//! variables are the outputs of the node's predecessors, keyed by
//! predecessor node id.

use nodeweave_workflow::NodeInputs;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A prompt with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    content: String,
}

impl PromptTemplate {
    /// Creates a template from its text.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Returns the unrendered text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Renders the template with the given variables.
    ///
    /// String values are inserted as-is, anything else as compact JSON.
    /// Placeholders without a variable are left untouched. The template is
    /// scanned once, so placeholder syntax inside an inserted value stays
    /// literal.
    #[must_use]
    pub fn render(&self, variables: &HashMap<String, JsonValue>) -> String {
        let mut rendered = String::with_capacity(self.content.len());
        let mut rest = self.content.as_str();

        while let Some(open) = rest.find("{{") {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                rest = &rest[open..];
                break;
            };

            let name = &after[..close];
            if name.contains("{{") {
                // An unclosed `{{` before a real placeholder.
                rendered.push_str("{{");
                rest = after;
                continue;
            }
            match variables.get(name) {
                Some(value) => rendered.push_str(&display_value(value)),
                None => {
                    rendered.push_str("{{");
                    rendered.push_str(name);
                    rendered.push_str("}}");
                }
            }
            rest = &after[close + 2..];
        }

        rendered.push_str(rest);
        rendered
    }

    /// Renders the template against predecessor outputs.
    #[must_use]
    pub fn render_inputs(&self, inputs: &NodeInputs) -> String {
        self.render(&Self::variables_from_inputs(inputs))
    }

    /// Maps each predecessor output to a variable named after the predecessor.
    ///
    /// An object output carrying a `result` field contributes that field
    /// instead of the whole object.
    #[must_use]
    pub fn variables_from_inputs(inputs: &NodeInputs) -> HashMap<String, JsonValue> {
        inputs
            .iter()
            .map(|(node_id, output)| {
                let value = output.get("result").unwrap_or(output).clone();
                (node_id.as_str().to_string(), value)
            })
            .collect()
    }
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
