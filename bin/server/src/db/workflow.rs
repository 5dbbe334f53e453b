//! Database repositories for workflows and their versions.
//!
//! Versions are immutable: editing a workflow appends a version with the
//! next number, and runs always point at the exact version they executed.

use super::decode_error;
use crate::error::WorkflowError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodeweave_core::{WorkflowId, WorkflowVersionId};
use nodeweave_workflow::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// A workflow record from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Creates a new workflow record.
    #[must_use]
    pub fn new(name: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name,
            description,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An immutable version of a workflow's definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVersionRecord {
    /// Version ID.
    pub id: WorkflowVersionId,
    /// Workflow this version belongs to.
    pub workflow_id: WorkflowId,
    /// 1-based, increasing per workflow.
    pub version_number: i32,
    /// The nodes and edges.
    pub definition: WorkflowDefinition,
    /// Free-form change notes.
    pub notes: Option<String>,
    /// When created.
    pub created_at: DateTime<Utc>,
}

impl WorkflowVersionRecord {
    fn new(
        workflow_id: WorkflowId,
        version_number: i32,
        definition: WorkflowDefinition,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: WorkflowVersionId::new(),
            workflow_id,
            version_number,
            definition,
            notes,
            created_at: Utc::now(),
        }
    }
}

/// Storage for workflows and their versions.
#[async_trait]
pub trait WorkflowCatalog: Send + Sync {
    /// Stores a new workflow together with its first version.
    async fn create(
        &self,
        workflow: &WorkflowRecord,
        definition: WorkflowDefinition,
        notes: Option<String>,
    ) -> Result<WorkflowVersionRecord, WorkflowError>;

    /// Finds a workflow by ID.
    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, WorkflowError>;

    /// Appends a version with the next version number.
    async fn add_version(
        &self,
        workflow_id: WorkflowId,
        definition: WorkflowDefinition,
        notes: Option<String>,
    ) -> Result<WorkflowVersionRecord, WorkflowError>;

    /// Returns the highest-numbered version of a workflow.
    async fn latest_version(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowVersionRecord>, WorkflowError>;

    /// Finds a version by ID.
    async fn find_version(
        &self,
        id: WorkflowVersionId,
    ) -> Result<Option<WorkflowVersionRecord>, WorkflowError>;
}

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_record(self) -> Result<WorkflowRecord, sqlx::Error> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| decode_error("workflow id", &self.id, e))?;

        Ok(WorkflowRecord {
            id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for version queries.
#[derive(FromRow)]
struct WorkflowVersionRow {
    id: String,
    workflow_id: String,
    version_number: i32,
    definition: serde_json::Value,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl WorkflowVersionRow {
    fn try_into_record(self) -> Result<WorkflowVersionRecord, sqlx::Error> {
        let id = WorkflowVersionId::from_str(&self.id)
            .map_err(|e| decode_error("workflow version id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_error("workflow id", &self.workflow_id, e))?;
        let definition = WorkflowDefinition::from_json(&self.definition)
            .map_err(|e| decode_error("definition of version", &self.id, e))?;

        Ok(WorkflowVersionRecord {
            id,
            workflow_id,
            version_number: self.version_number,
            definition,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

const VERSION_COLUMNS: &str = "id, workflow_id, version_number, definition, notes, created_at";

/// Postgres-backed workflow catalog.
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_version(
        tx: &mut sqlx::PgConnection,
        version: &WorkflowVersionRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflow_versions
                (id, workflow_id, version_number, definition, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(version.id.to_string())
        .bind(version.workflow_id.to_string())
        .bind(version.version_number)
        .bind(version.definition.to_json())
        .bind(&version.notes)
        .bind(version.created_at)
        .execute(tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowCatalog for WorkflowRepository {
    async fn create(
        &self,
        workflow: &WorkflowRecord,
        definition: WorkflowDefinition,
        notes: Option<String>,
    ) -> Result<WorkflowVersionRecord, WorkflowError> {
        let version = WorkflowVersionRecord::new(workflow.id, 1, definition, notes);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await?;
        Self::insert_version(&mut tx, &version).await?;

        tx.commit().await?;
        Ok(version)
    }

    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, WorkflowError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WorkflowRow::try_into_record).transpose()?)
    }

    async fn add_version(
        &self,
        workflow_id: WorkflowId,
        definition: WorkflowDefinition,
        notes: Option<String>,
    ) -> Result<WorkflowVersionRecord, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        // Locking the parent row serializes concurrent version appends.
        let locked: Option<(String,)> =
            sqlx::query_as("SELECT id FROM workflows WHERE id = $1 FOR UPDATE")
                .bind(workflow_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(WorkflowError::NotFound {
                id: workflow_id.to_string(),
            });
        }

        let (latest,): (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(version_number) FROM workflow_versions WHERE workflow_id = $1",
        )
        .bind(workflow_id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let version =
            WorkflowVersionRecord::new(workflow_id, latest.unwrap_or(0) + 1, definition, notes);
        Self::insert_version(&mut tx, &version).await?;
        sqlx::query("UPDATE workflows SET updated_at = $2 WHERE id = $1")
            .bind(workflow_id.to_string())
            .bind(version.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }

    async fn latest_version(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowVersionRecord>, WorkflowError> {
        let row: Option<WorkflowVersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions
             WHERE workflow_id = $1
             ORDER BY version_number DESC
             LIMIT 1"
        ))
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WorkflowVersionRow::try_into_record).transpose()?)
    }

    async fn find_version(
        &self,
        id: WorkflowVersionId,
    ) -> Result<Option<WorkflowVersionRecord>, WorkflowError> {
        let row: Option<WorkflowVersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WorkflowVersionRow::try_into_record).transpose()?)
    }
}

#[derive(Default)]
struct CatalogEntries {
    workflows: HashMap<WorkflowId, WorkflowRecord>,
    versions: Vec<WorkflowVersionRecord>,
}

/// In-memory workflow catalog for tests and database-less embedding.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowCatalog {
    entries: Arc<Mutex<CatalogEntries>>,
}

impl InMemoryWorkflowCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CatalogEntries>, WorkflowError> {
        self.entries
            .lock()
            .map_err(|e| WorkflowError::DatabaseError {
                details: e.to_string(),
            })
    }
}

#[async_trait]
impl WorkflowCatalog for InMemoryWorkflowCatalog {
    async fn create(
        &self,
        workflow: &WorkflowRecord,
        definition: WorkflowDefinition,
        notes: Option<String>,
    ) -> Result<WorkflowVersionRecord, WorkflowError> {
        let version = WorkflowVersionRecord::new(workflow.id, 1, definition, notes);
        let mut entries = self.lock()?;
        entries.workflows.insert(workflow.id, workflow.clone());
        entries.versions.push(version.clone());
        Ok(version)
    }

    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, WorkflowError> {
        Ok(self.lock()?.workflows.get(&id).cloned())
    }

    async fn add_version(
        &self,
        workflow_id: WorkflowId,
        definition: WorkflowDefinition,
        notes: Option<String>,
    ) -> Result<WorkflowVersionRecord, WorkflowError> {
        let mut entries = self.lock()?;
        if !entries.workflows.contains_key(&workflow_id) {
            return Err(WorkflowError::NotFound {
                id: workflow_id.to_string(),
            });
        }
        let latest = entries
            .versions
            .iter()
            .filter(|v| v.workflow_id == workflow_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0);

        let version = WorkflowVersionRecord::new(workflow_id, latest + 1, definition, notes);
        entries.versions.push(version.clone());
        if let Some(workflow) = entries.workflows.get_mut(&workflow_id) {
            workflow.updated_at = version.created_at;
        }
        Ok(version)
    }

    async fn latest_version(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowVersionRecord>, WorkflowError> {
        Ok(self
            .lock()?
            .versions
            .iter()
            .filter(|v| v.workflow_id == workflow_id)
            .max_by_key(|v| v.version_number)
            .cloned())
    }

    async fn find_version(
        &self,
        id: WorkflowVersionId,
    ) -> Result<Option<WorkflowVersionRecord>, WorkflowError> {
        Ok(self.lock()?.versions.iter().find(|v| v.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeweave_workflow::NodeSpec;

    fn definition(node: &str) -> WorkflowDefinition {
        WorkflowDefinition::new().with_node(NodeSpec::new(node, "trigger"))
    }

    #[tokio::test]
    async fn versions_are_numbered_per_workflow() {
        let catalog = InMemoryWorkflowCatalog::new();
        let workflow = WorkflowRecord::new("Digest".to_string(), None);
        let other = WorkflowRecord::new("Other".to_string(), None);

        let first = catalog
            .create(&workflow, definition("a"), None)
            .await
            .expect("create");
        catalog
            .create(&other, definition("x"), None)
            .await
            .expect("create other");
        let second = catalog
            .add_version(workflow.id, definition("b"), Some("rename".to_string()))
            .await
            .expect("add version");

        assert_eq!(first.version_number, 1);
        assert_eq!(second.version_number, 2);

        let latest = catalog
            .latest_version(workflow.id)
            .await
            .expect("latest")
            .expect("has versions");
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.definition, definition("b"));

        let original = catalog
            .find_version(first.id)
            .await
            .expect("find")
            .expect("first version kept");
        assert_eq!(original.definition, definition("a"));
    }

    #[tokio::test]
    async fn add_version_to_unknown_workflow_fails() {
        let catalog = InMemoryWorkflowCatalog::new();
        let result = catalog
            .add_version(WorkflowId::new(), definition("a"), None)
            .await;
        assert!(matches!(result, Err(WorkflowError::NotFound { .. })));
    }

    #[test]
    fn version_row_rejects_bad_ids() {
        let row = WorkflowVersionRow {
            id: "not-an-id".to_string(),
            workflow_id: WorkflowId::new().to_string(),
            version_number: 1,
            definition: serde_json::json!({"nodes": [], "edges": []}),
            notes: None,
            created_at: Utc::now(),
        };
        assert!(matches!(row.try_into_record(), Err(sqlx::Error::Decode(_))));
    }
}
