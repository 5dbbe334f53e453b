//! Execution record store contract.
//!
//! The scheduler persists every run and node transition through a
//! [`RecordStore`] and awaits each write before moving on, so the stored
//! history is consistent at every point a crash could happen.
//!
//! [`InMemoryRecordStore`] keeps everything in process memory and is what
//! tests and single-process embedders use; the server provides a
//! Postgres implementation.

use crate::execution::{ExecutionRecord, NodeExecutionRecord, RunStatus};
use async_trait::async_trait;
use nodeweave_core::{NodeExecutionId, WorkflowId, WorkflowRunId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Filter for listing runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    /// Only runs of this workflow.
    pub workflow_id: Option<WorkflowId>,
    /// Only runs in this status.
    pub status: Option<RunStatus>,
    /// Maximum number of runs to return.
    pub limit: Option<usize>,
}

impl RunFilter {
    /// Returns true if the run passes the workflow and status filters.
    #[must_use]
    pub fn matches(&self, run: &ExecutionRecord) -> bool {
        self.workflow_id.is_none_or(|id| run.workflow_id == id)
            && self.status.is_none_or(|status| run.status == status)
    }
}

/// Trait for execution record persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Stores a new run record.
    async fn create_run(&self, run: &ExecutionRecord) -> Result<(), RecordStoreError>;

    /// Loads a run record.
    async fn load_run(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Option<ExecutionRecord>, RecordStoreError>;

    /// Writes a run transition and returns the stored record.
    ///
    /// A run that is already terminal is left untouched and returned as
    /// stored, so a cancellation is never overwritten by a late completion.
    async fn update_run(&self, run: &ExecutionRecord) -> Result<ExecutionRecord, RecordStoreError>;

    /// Lists runs newest first.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<ExecutionRecord>, RecordStoreError>;

    /// Stores a new node execution record.
    async fn create_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError>;

    /// Updates a node execution record.
    async fn update_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError>;

    /// Lists the node executions of a run ordered by start time.
    async fn list_node_executions(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Vec<NodeExecutionRecord>, RecordStoreError>;
}

/// Errors from record store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStoreError {
    /// Failed to reach the backing store.
    ConnectionFailed { message: String },
    /// A record with the same id already exists.
    AlreadyExists { id: String },
    /// The record to update does not exist.
    NotFound { id: String },
    /// Failed to write a record.
    WriteFailed { message: String },
    /// Failed to read or decode records.
    ReadFailed { message: String },
}

impl std::fmt::Display for RecordStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "record store connection failed: {message}")
            }
            Self::AlreadyExists { id } => write!(f, "record already exists: {id}"),
            Self::NotFound { id } => write!(f, "record not found: {id}"),
            Self::WriteFailed { message } => write!(f, "record write failed: {message}"),
            Self::ReadFailed { message } => write!(f, "record read failed: {message}"),
        }
    }
}

impl std::error::Error for RecordStoreError {}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn create_run(&self, run: &ExecutionRecord) -> Result<(), RecordStoreError> {
        (**self).create_run(run).await
    }

    async fn load_run(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Option<ExecutionRecord>, RecordStoreError> {
        (**self).load_run(run_id).await
    }

    async fn update_run(&self, run: &ExecutionRecord) -> Result<ExecutionRecord, RecordStoreError> {
        (**self).update_run(run).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<ExecutionRecord>, RecordStoreError> {
        (**self).list_runs(filter).await
    }

    async fn create_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError> {
        (**self).create_node_execution(execution).await
    }

    async fn update_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError> {
        (**self).update_node_execution(execution).await
    }

    async fn list_node_executions(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Vec<NodeExecutionRecord>, RecordStoreError> {
        (**self).list_node_executions(run_id).await
    }
}

#[derive(Default)]
struct Records {
    runs: HashMap<WorkflowRunId, ExecutionRecord>,
    node_executions: HashMap<NodeExecutionId, NodeExecutionRecord>,
    // Per-run ids in insertion order, which doubles as start order.
    run_nodes: HashMap<WorkflowRunId, Vec<NodeExecutionId>>,
}

/// In-memory record store.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<Mutex<Records>>,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Records>, RecordStoreError> {
        self.records
            .lock()
            .map_err(|e| RecordStoreError::ConnectionFailed {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_run(&self, run: &ExecutionRecord) -> Result<(), RecordStoreError> {
        let mut records = self.lock()?;
        if records.runs.contains_key(&run.id) {
            return Err(RecordStoreError::AlreadyExists {
                id: run.id.to_string(),
            });
        }
        records.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Option<ExecutionRecord>, RecordStoreError> {
        Ok(self.lock()?.runs.get(&run_id).cloned())
    }

    async fn update_run(&self, run: &ExecutionRecord) -> Result<ExecutionRecord, RecordStoreError> {
        let mut records = self.lock()?;
        let stored = records
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| RecordStoreError::NotFound {
                id: run.id.to_string(),
            })?;
        if !stored.status.is_terminal() {
            *stored = run.clone();
        }
        Ok(stored.clone())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<ExecutionRecord>, RecordStoreError> {
        let records = self.lock()?;
        let mut runs: Vec<ExecutionRecord> = records
            .runs
            .values()
            .filter(|run| filter.matches(run))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn create_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError> {
        let mut records = self.lock()?;
        if records.node_executions.contains_key(&execution.id) {
            return Err(RecordStoreError::AlreadyExists {
                id: execution.id.to_string(),
            });
        }
        records
            .node_executions
            .insert(execution.id, execution.clone());
        records
            .run_nodes
            .entry(execution.execution_id)
            .or_default()
            .push(execution.id);
        Ok(())
    }

    async fn update_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError> {
        let mut records = self.lock()?;
        let stored = records
            .node_executions
            .get_mut(&execution.id)
            .ok_or_else(|| RecordStoreError::NotFound {
                id: execution.id.to_string(),
            })?;
        *stored = execution.clone();
        Ok(())
    }

    async fn list_node_executions(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Vec<NodeExecutionRecord>, RecordStoreError> {
        let records = self.lock()?;
        let mut executions: Vec<NodeExecutionRecord> = records
            .run_nodes
            .get(&run_id)
            .into_iter()
            .flatten()
            .filter_map(|id| records.node_executions.get(id))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; unstarted records go last.
        executions.sort_by_key(|execution| (execution.started_at.is_none(), execution.started_at));
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::NodeSpec;
    use crate::execution::{NodeStatus, TriggerType};
    use crate::handler::NodeInputs;
    use nodeweave_core::WorkflowVersionId;

    fn pending_run(workflow_id: WorkflowId) -> ExecutionRecord {
        ExecutionRecord::new(workflow_id, WorkflowVersionId::new(), TriggerType::Manual)
    }

    #[tokio::test]
    async fn create_and_load_run() {
        let store = InMemoryRecordStore::new();
        let run = pending_run(WorkflowId::new());

        store.create_run(&run).await.expect("create");
        let loaded = store.load_run(run.id).await.expect("load");
        assert_eq!(loaded, Some(run.clone()));

        let duplicate = store.create_run(&run).await;
        assert!(matches!(duplicate, Err(RecordStoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn update_never_overwrites_terminal_run() {
        let store = InMemoryRecordStore::new();
        let mut run = pending_run(WorkflowId::new());
        store.create_run(&run).await.expect("create");

        let mut cancelled = run.clone();
        cancelled.cancel();
        let stored = store.update_run(&cancelled).await.expect("cancel");
        assert_eq!(stored.status, RunStatus::Cancelled);

        run.start();
        run.complete();
        let stored = store.update_run(&run).await.expect("late completion");
        assert_eq!(stored.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn update_unknown_run_fails() {
        let store = InMemoryRecordStore::new();
        let result = store.update_run(&pending_run(WorkflowId::new())).await;
        assert!(matches!(result, Err(RecordStoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_runs_filters_and_orders_newest_first() {
        let store = InMemoryRecordStore::new();
        let workflow_id = WorkflowId::new();

        let first = pending_run(workflow_id);
        let mut second = pending_run(workflow_id);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        second.start();
        let other = pending_run(WorkflowId::new());
        for run in [&first, &second, &other] {
            store.create_run(run).await.expect("create");
        }

        let filter = RunFilter {
            workflow_id: Some(workflow_id),
            ..RunFilter::default()
        };
        let runs = store.list_runs(&filter).await.expect("list");
        let ids: Vec<_> = runs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let filter = RunFilter {
            workflow_id: Some(workflow_id),
            status: Some(RunStatus::Pending),
            limit: Some(5),
        };
        let runs = store.list_runs(&filter).await.expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, first.id);
    }

    #[tokio::test]
    async fn node_executions_are_listed_per_run() {
        let store = InMemoryRecordStore::new();
        let run_id = WorkflowRunId::new();
        let other_run = WorkflowRunId::new();

        let inputs = NodeInputs::new();
        let mut a = NodeExecutionRecord::running(run_id, &NodeSpec::new("a", "trigger"), &inputs);
        let b = NodeExecutionRecord::running(run_id, &NodeSpec::new("b", "action"), &inputs);
        let c = NodeExecutionRecord::running(other_run, &NodeSpec::new("c", "action"), &inputs);
        for record in [&a, &b, &c] {
            store.create_node_execution(record).await.expect("create");
        }

        a.complete(serde_json::json!({"ok": true}));
        store.update_node_execution(&a).await.expect("update");

        let listed = store.list_node_executions(run_id).await.expect("list");
        let nodes: Vec<&str> = listed.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["a", "b"]);
        assert_eq!(listed[0].status, NodeStatus::Completed);
    }

    #[tokio::test]
    async fn node_executions_are_keyed_by_id() {
        let store = InMemoryRecordStore::new();
        let first_run = WorkflowRunId::new();
        let second_run = WorkflowRunId::new();
        let inputs = NodeInputs::new();

        let mut records = Vec::new();
        for (run_id, node) in [
            (first_run, "a"),
            (second_run, "x"),
            (first_run, "b"),
            (second_run, "y"),
        ] {
            let record = NodeExecutionRecord::running(run_id, &NodeSpec::new(node, "action"), &inputs);
            store.create_node_execution(&record).await.expect("create");
            records.push(record);
        }

        let duplicate = store.create_node_execution(&records[0]).await;
        assert!(matches!(duplicate, Err(RecordStoreError::AlreadyExists { .. })));

        let stray = NodeExecutionRecord::running(first_run, &NodeSpec::new("c", "action"), &inputs);
        let missing = store.update_node_execution(&stray).await;
        assert!(matches!(missing, Err(RecordStoreError::NotFound { .. })));

        let mut y = records[3].clone();
        y.fail("boom".to_string());
        store.update_node_execution(&y).await.expect("update");

        let second: Vec<(String, NodeStatus)> = store
            .list_node_executions(second_run)
            .await
            .expect("list")
            .into_iter()
            .map(|r| (r.node_id.to_string(), r.status))
            .collect();
        assert_eq!(
            second,
            vec![
                ("x".to_string(), NodeStatus::Running),
                ("y".to_string(), NodeStatus::Failed),
            ]
        );
        assert_eq!(store.list_node_executions(first_run).await.expect("list").len(), 2);
        assert!(store.list_node_executions(WorkflowRunId::new()).await.expect("list").is_empty());
    }
}
