//! Execution records and their state machines.
//!
//! One [`ExecutionRecord`] exists per run and one [`NodeExecutionRecord`]
//! per node that the scheduler started. Both serialize to a stable
//! dictionary form with ISO-8601 timestamps and `null` for values that
//! have not been reached yet.

use crate::definition::{NodeId, NodeSpec};
use crate::handler::NodeInputs;
use chrono::{DateTime, Utc};
use nodeweave_core::{NodeExecutionId, WorkflowId, WorkflowRunId, WorkflowVersionId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// The overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, waiting for the scheduler.
    Pending,
    /// The scheduler is executing frontiers.
    Running,
    /// Every node completed (or was legitimately skipped).
    Completed,
    /// A structural error or a node failure ended the run.
    Failed,
    /// Cancelled on request.
    Cancelled,
}

impl RunStatus {
    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    /// The rejected value.
    pub value: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.value)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for RunStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseStatusError {
                value: other.to_string(),
            }),
        }
    }
}

/// The status of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not started.
    Pending,
    /// Handler invoked, outcome not yet recorded.
    Running,
    /// Handler returned an output.
    Completed,
    /// Handler failed, timed out, or the type is unsupported.
    Failed,
    /// Never started because the run ended first.
    Skipped,
}

impl NodeStatus {
    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(ParseStatusError {
                value: other.to_string(),
            }),
        }
    }
}

/// How a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Explicit API call.
    Manual,
    /// Cron schedule.
    Scheduled,
    /// Incoming webhook.
    Webhook,
    /// Platform event.
    Event,
}

impl TriggerType {
    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Webhook => "webhook",
            Self::Event => "event",
        }
    }
}

impl FromStr for TriggerType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "webhook" => Ok(Self::Webhook),
            "event" => Ok(Self::Event),
            other => Err(ParseStatusError {
                value: other.to_string(),
            }),
        }
    }
}

/// The record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Run ID.
    pub id: WorkflowRunId,
    /// Workflow being executed.
    pub workflow_id: WorkflowId,
    /// The exact definition version being executed.
    pub workflow_version_id: WorkflowVersionId,
    /// Current status.
    pub status: RunStatus,
    /// How the run was requested.
    pub trigger_type: TriggerType,
    /// Who or what requested the run, if known.
    pub triggered_by: Option<String>,
    /// When the run was requested.
    pub created_at: DateTime<Utc>,
    /// When the scheduler picked it up.
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason, if failed.
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    /// Creates a new run record in pending state.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        workflow_version_id: WorkflowVersionId,
        trigger_type: TriggerType,
    ) -> Self {
        Self {
            id: WorkflowRunId::new(),
            workflow_id,
            workflow_version_id,
            status: RunStatus::Pending,
            trigger_type,
            triggered_by: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    /// Records who requested the run.
    #[must_use]
    pub fn with_triggered_by(mut self, triggered_by: impl Into<String>) -> Self {
        self.triggered_by = Some(triggered_by.into());
        self
    }

    /// Starts the run.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the run as completed.
    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as failed.
    pub fn fail(&mut self, error: String) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(error);
    }

    /// Marks the run as cancelled.
    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }

    /// Returns the dictionary form of the record.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// The record of one node executing within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    /// Record ID.
    pub id: NodeExecutionId,
    /// Run this execution belongs to.
    pub execution_id: WorkflowRunId,
    /// Node within the definition.
    pub node_id: NodeId,
    /// The node's type tag.
    pub node_type: String,
    /// Current status.
    pub status: NodeStatus,
    /// Outputs of the predecessors, keyed by their node id.
    pub input_data: Option<JsonValue>,
    /// Output produced by the handler.
    pub output_data: Option<JsonValue>,
    /// Failure reason, if failed.
    pub error_message: Option<String>,
    /// When the handler was invoked.
    pub started_at: Option<DateTime<Utc>>,
    /// When the outcome was recorded.
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecutionRecord {
    /// Creates a pending record for a node.
    #[must_use]
    pub fn new(execution_id: WorkflowRunId, node: &NodeSpec) -> Self {
        Self {
            id: NodeExecutionId::new(),
            execution_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Pending,
            input_data: None,
            output_data: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Creates a record for a node that is about to run with the given inputs.
    #[must_use]
    pub fn running(execution_id: WorkflowRunId, node: &NodeSpec, inputs: &NodeInputs) -> Self {
        let mut record = Self::new(execution_id, node);
        record.start(inputs);
        record
    }

    /// Starts execution of this node.
    pub fn start(&mut self, inputs: &NodeInputs) {
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
        self.input_data = Some(serde_json::to_value(inputs).unwrap_or(JsonValue::Null));
    }

    /// Marks the node as completed.
    pub fn complete(&mut self, output: JsonValue) {
        self.status = NodeStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.output_data = Some(output);
    }

    /// Marks the node as failed.
    pub fn fail(&mut self, error: String) {
        self.status = NodeStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(error);
    }

    /// Marks the node as skipped.
    pub fn skip(&mut self) {
        self.status = NodeStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }

    /// Returns the dictionary form of the record.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_run() -> ExecutionRecord {
        ExecutionRecord::new(
            WorkflowId::new(),
            WorkflowVersionId::new(),
            TriggerType::Manual,
        )
    }

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("queued".parse::<RunStatus>().is_err());
        assert_eq!("skipped".parse::<NodeStatus>(), Ok(NodeStatus::Skipped));
        assert_eq!("webhook".parse::<TriggerType>(), Ok(TriggerType::Webhook));
    }

    #[test]
    fn run_lifecycle() {
        let mut run = sample_run();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.started_at.is_none());

        run.start();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.duration().is_some());

        run.fail("boom".to_string());
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("boom"));
        assert!(run.finished_at >= run.started_at);
    }

    #[test]
    fn run_dictionary_has_nulls_for_unreached_values() {
        let run = sample_run().with_triggered_by("usr_42");
        let dict = run.to_json();

        assert_eq!(dict["status"], "pending");
        assert_eq!(dict["trigger_type"], "manual");
        assert_eq!(dict["triggered_by"], "usr_42");
        assert_eq!(dict["id"], json!(run.id));
        assert!(dict["finished_at"].is_null());
        assert!(dict["error_message"].is_null());
        assert!(dict["created_at"].as_str().is_some_and(|s| s.contains('T')));
    }

    #[test]
    fn to_json_is_stable() {
        let mut run = sample_run();
        run.start();
        assert_eq!(run.to_json(), run.to_json());

        let node = NodeSpec::new("a", "trigger");
        let record = NodeExecutionRecord::running(run.id, &node, &NodeInputs::new());
        assert_eq!(record.to_json(), record.to_json());
    }

    #[test]
    fn node_record_lifecycle() {
        let run_id = WorkflowRunId::new();
        let node = NodeSpec::new("b", "action");
        let mut inputs = NodeInputs::new();
        inputs.insert(NodeId::from("a"), json!({"x": 1}));

        let mut record = NodeExecutionRecord::running(run_id, &node, &inputs);
        assert_eq!(record.status, NodeStatus::Running);
        assert_eq!(record.input_data, Some(json!({"a": {"x": 1}})));
        assert!(record.to_json()["output_data"].is_null());

        record.complete(json!({"success": true}));
        assert_eq!(record.status, NodeStatus::Completed);
        let dict = record.to_json();
        assert_eq!(dict["node_id"], "b");
        assert_eq!(dict["execution_id"], json!(run_id));
        assert_eq!(dict["output_data"], json!({"success": true}));
    }

    #[test]
    fn record_serde_roundtrip() {
        let run = sample_run();
        let json = serde_json::to_string(&run).expect("serialize");
        let parsed: ExecutionRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(run, parsed);
    }
}
