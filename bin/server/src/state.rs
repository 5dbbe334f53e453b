//! Shared application state.

use crate::db::WorkflowCatalog;
use nodeweave_workflow::{EngineConfig, HandlerRegistry, RecordStore, WorkflowEngine};
use std::sync::Arc;

/// The engine as shared by request handlers.
pub type SharedEngine = WorkflowEngine<Arc<dyn RecordStore>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Workflow and version storage.
    pub workflows: Arc<dyn WorkflowCatalog>,
    /// Execution engine; also owns the record store.
    pub engine: Arc<SharedEngine>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        workflows: Arc<dyn WorkflowCatalog>,
        records: Arc<dyn RecordStore>,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            engine: Arc::new(WorkflowEngine::new(registry, records).with_config(config)),
        }
    }
}
