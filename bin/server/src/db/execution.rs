//! Postgres implementation of the execution record store.

use super::decode_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeweave_core::{NodeExecutionId, WorkflowId, WorkflowRunId, WorkflowVersionId};
use nodeweave_workflow::{
    ExecutionRecord, NodeExecutionRecord, NodeId, NodeStatus, RecordStore, RecordStoreError,
    RunFilter, RunStatus, TriggerType,
};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

fn read_failed(e: sqlx::Error) -> RecordStoreError {
    RecordStoreError::ReadFailed {
        message: e.to_string(),
    }
}

fn write_failed(id: String) -> impl FnOnce(sqlx::Error) -> RecordStoreError {
    move |e| {
        let unique_violation = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if unique_violation {
            RecordStoreError::AlreadyExists { id }
        } else {
            RecordStoreError::WriteFailed {
                message: e.to_string(),
            }
        }
    }
}

const RUN_COLUMNS: &str = "id, workflow_id, workflow_version_id, status, trigger_type, \
     triggered_by, created_at, started_at, finished_at, error_message";

const NODE_COLUMNS: &str = "id, execution_id, node_id, node_type, status, input_data, \
     output_data, error_message, started_at, finished_at";

/// Row type for run queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    workflow_version_id: String,
    status: String,
    trigger_type: String,
    triggered_by: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl ExecutionRow {
    fn try_into_record(self) -> Result<ExecutionRecord, sqlx::Error> {
        let id = WorkflowRunId::from_str(&self.id)
            .map_err(|e| decode_error("execution id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_error("workflow id", &self.workflow_id, e))?;
        let workflow_version_id = WorkflowVersionId::from_str(&self.workflow_version_id)
            .map_err(|e| decode_error("workflow version id", &self.workflow_version_id, e))?;
        let status = self
            .status
            .parse::<RunStatus>()
            .map_err(|e| decode_error("execution status", &self.status, e))?;
        let trigger_type = self
            .trigger_type
            .parse::<TriggerType>()
            .map_err(|e| decode_error("trigger type", &self.trigger_type, e))?;

        Ok(ExecutionRecord {
            id,
            workflow_id,
            workflow_version_id,
            status,
            trigger_type,
            triggered_by: self.triggered_by,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error_message: self.error_message,
        })
    }
}

/// Row type for node execution queries.
#[derive(FromRow)]
struct NodeExecutionRow {
    id: String,
    execution_id: String,
    node_id: String,
    node_type: String,
    status: String,
    input_data: Option<serde_json::Value>,
    output_data: Option<serde_json::Value>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl NodeExecutionRow {
    fn try_into_record(self) -> Result<NodeExecutionRecord, sqlx::Error> {
        let id = NodeExecutionId::from_str(&self.id)
            .map_err(|e| decode_error("node execution id", &self.id, e))?;
        let execution_id = WorkflowRunId::from_str(&self.execution_id)
            .map_err(|e| decode_error("execution id", &self.execution_id, e))?;
        let status = self
            .status
            .parse::<NodeStatus>()
            .map_err(|e| decode_error("node status", &self.status, e))?;

        Ok(NodeExecutionRecord {
            id,
            execution_id,
            node_id: NodeId::new(self.node_id),
            node_type: self.node_type,
            status,
            input_data: self.input_data,
            output_data: self.output_data,
            error_message: self.error_message,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

/// Postgres-backed record store.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_run(&self, run: &ExecutionRecord) -> Result<(), RecordStoreError> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, workflow_version_id, status, trigger_type, triggered_by,
                 created_at, started_at, finished_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run.workflow_version_id.to_string())
        .bind(run.status.as_str())
        .bind(run.trigger_type.as_str())
        .bind(&run.triggered_by)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await
        .map_err(write_failed(run.id.to_string()))?;

        Ok(())
    }

    async fn load_run(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Option<ExecutionRecord>, RecordStoreError> {
        let row: Option<ExecutionRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM executions WHERE id = $1"))
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(read_failed)?;

        row.map(ExecutionRow::try_into_record)
            .transpose()
            .map_err(read_failed)
    }

    async fn update_run(&self, run: &ExecutionRecord) -> Result<ExecutionRecord, RecordStoreError> {
        // Terminal rows are never rewritten; the caller gets the stored row back.
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            WITH updated AS (
                UPDATE executions
                SET status = $2, started_at = $3, finished_at = $4, error_message = $5
                WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
                RETURNING {RUN_COLUMNS}
            )
            SELECT {RUN_COLUMNS} FROM updated
            UNION ALL
            SELECT {RUN_COLUMNS} FROM executions
            WHERE id = $1 AND NOT EXISTS (SELECT 1 FROM updated)
            "#
        ))
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(write_failed(run.id.to_string()))?;

        match row {
            Some(row) => row.try_into_record().map_err(read_failed),
            None => Err(RecordStoreError::NotFound {
                id: run.id.to_string(),
            }),
        }
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<ExecutionRecord>, RecordStoreError> {
        let limit = filter
            .limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM executions
            WHERE ($1::TEXT IS NULL OR workflow_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(filter.workflow_id.map(|id| id.to_string()))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed)?;

        rows.into_iter()
            .map(ExecutionRow::try_into_record)
            .collect::<Result<_, _>>()
            .map_err(read_failed)
    }

    async fn create_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError> {
        sqlx::query(
            r#"
            INSERT INTO node_executions
                (id, execution_id, node_id, node_type, status, input_data, output_data,
                 error_message, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.execution_id.to_string())
        .bind(execution.node_id.as_str())
        .bind(&execution.node_type)
        .bind(execution.status.as_str())
        .bind(&execution.input_data)
        .bind(&execution.output_data)
        .bind(&execution.error_message)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await
        .map_err(write_failed(execution.id.to_string()))?;

        Ok(())
    }

    async fn update_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RecordStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE node_executions
            SET status = $2, input_data = $3, output_data = $4, error_message = $5,
                started_at = $6, finished_at = $7
            WHERE id = $1
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.input_data)
        .bind(&execution.output_data)
        .bind(&execution.error_message)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await
        .map_err(write_failed(execution.id.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::NotFound {
                id: execution.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_node_executions(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Vec<NodeExecutionRecord>, RecordStoreError> {
        let rows: Vec<NodeExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {NODE_COLUMNS}
            FROM node_executions
            WHERE execution_id = $1
            ORDER BY started_at ASC NULLS LAST, id ASC
            "#
        ))
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed)?;

        rows.into_iter()
            .map(NodeExecutionRow::try_into_record)
            .collect::<Result<_, _>>()
            .map_err(read_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_row(status: &str) -> ExecutionRow {
        ExecutionRow {
            id: WorkflowRunId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            workflow_version_id: WorkflowVersionId::new().to_string(),
            status: status.to_string(),
            trigger_type: "manual".to_string(),
            triggered_by: Some("api".to_string()),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    #[test]
    fn execution_row_converts() {
        let record = run_row("running").try_into_record().expect("valid row");
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.trigger_type, TriggerType::Manual);
        assert_eq!(record.triggered_by.as_deref(), Some("api"));
    }

    #[test]
    fn execution_row_rejects_unknown_status() {
        let result = run_row("paused").try_into_record();
        assert!(matches!(result, Err(sqlx::Error::Decode(_))));
    }

    #[test]
    fn node_row_converts() {
        let row = NodeExecutionRow {
            id: NodeExecutionId::new().to_string(),
            execution_id: WorkflowRunId::new().to_string(),
            node_id: "send".to_string(),
            node_type: "action".to_string(),
            status: "skipped".to_string(),
            input_data: None,
            output_data: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        };
        let record = row.try_into_record().expect("valid row");
        assert_eq!(record.node_id.as_str(), "send");
        assert_eq!(record.status, NodeStatus::Skipped);
    }

    #[test]
    fn node_row_rejects_bad_execution_id() {
        let row = NodeExecutionRow {
            id: NodeExecutionId::new().to_string(),
            execution_id: "run_nope".to_string(),
            node_id: "send".to_string(),
            node_type: "action".to_string(),
            status: "pending".to_string(),
            input_data: None,
            output_data: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        };
        assert!(matches!(row.try_into_record(), Err(sqlx::Error::Decode(_))));
    }
}
