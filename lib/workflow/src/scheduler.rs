//! Execution scheduler.
//!
//! The engine runs a workflow run in breadth-first topological layers:
//!
//! 1. Move the run from `pending` to `running`
//! 2. Parse the definition; a malformed one fails the run immediately
//! 3. Execute the frontier (every unexecuted node whose predecessors have
//!    all executed), persisting each node before and after its handler runs
//! 4. Stop on the first node failure, on cancellation, or when no frontier
//!    can be formed although nodes remain (a cycle)
//! 5. Write the terminal run status
//!
//! Node failures are data: they end up in the records and in the returned
//! [`RunOutcome`]. Only record store failures surface as [`EngineError`].

use crate::definition::{NodeId, NodeSpec, WorkflowDefinition};
use crate::error::{EngineError, ExecutionError};
use crate::execution::{ExecutionRecord, NodeExecutionRecord, RunStatus};
use crate::graph::WorkflowGraph;
use crate::handler::{HandlerRegistry, NodeExecutionError, NodeInputs};
use crate::store::RecordStore;
use futures::future::join_all;
use nodeweave_core::WorkflowRunId;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::instrument;

/// How the nodes of one frontier are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontierMode {
    /// One node at a time in declaration order; the first failure stops
    /// the remaining nodes of the frontier from starting.
    #[default]
    Sequential,
    /// All nodes of the frontier at once; every dispatched node records
    /// its outcome before the run fails.
    Parallel,
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on a single handler call.
    pub node_timeout: Duration,
    /// Frontier dispatch strategy.
    pub frontier_mode: FrontierMode,
    /// Write `skipped` records for nodes a failed or cancelled run never started.
    pub record_skipped_nodes: bool,
}

impl EngineConfig {
    /// Sets the node timeout.
    #[must_use]
    pub fn with_node_timeout(mut self, node_timeout: Duration) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    /// Sets the frontier dispatch strategy.
    #[must_use]
    pub fn with_frontier_mode(mut self, frontier_mode: FrontierMode) -> Self {
        self.frontier_mode = frontier_mode;
        self
    }

    /// Enables or disables `skipped` records.
    #[must_use]
    pub fn with_record_skipped_nodes(mut self, record_skipped_nodes: bool) -> Self {
        self.record_skipped_nodes = record_skipped_nodes;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(300),
            frontier_mode: FrontierMode::Sequential,
            record_skipped_nodes: false,
        }
    }
}

/// Final result of a run as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// The run.
    pub run_id: WorkflowRunId,
    /// Terminal status.
    pub status: RunStatus,
    /// Why the run failed, when it did.
    pub error: Option<ExecutionError>,
}

impl RunOutcome {
    /// Returns true if the run completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// How the frontier loop ended.
enum RunEnd {
    Completed,
    Failed(ExecutionError),
    Cancelled,
}

/// Per-run scheduler state. Discarded when the run terminates.
struct RunContext<'g> {
    graph: &'g WorkflowGraph,
    /// Output of every completed node. Each slot is written once.
    outputs: HashMap<NodeId, JsonValue>,
    /// Nodes whose handler was invoked, whatever the outcome.
    started: HashSet<NodeId>,
}

impl<'g> RunContext<'g> {
    fn new(graph: &'g WorkflowGraph) -> Self {
        Self {
            graph,
            outputs: HashMap::with_capacity(graph.node_count()),
            started: HashSet::with_capacity(graph.node_count()),
        }
    }

    fn is_executed(&self, node_id: &NodeId) -> bool {
        self.outputs.contains_key(node_id)
    }

    fn is_finished(&self) -> bool {
        self.outputs.len() == self.graph.node_count()
    }

    /// Unexecuted nodes whose predecessors have all executed.
    fn next_frontier(&self) -> Vec<&'g NodeSpec> {
        self.graph
            .nodes()
            .filter(|node| !self.is_executed(&node.id))
            .filter(|node| {
                self.graph
                    .predecessors(&node.id)
                    .into_iter()
                    .all(|pred| self.is_executed(pred))
            })
            .collect()
    }

    /// Outputs of the node's predecessors, keyed by predecessor id.
    fn inputs_for(&self, node_id: &NodeId) -> NodeInputs {
        self.graph
            .predecessors(node_id)
            .into_iter()
            .filter_map(|pred| {
                self.outputs
                    .get(pred)
                    .map(|output| (pred.clone(), output.clone()))
            })
            .collect()
    }

    fn mark_started(&mut self, node_id: &NodeId) {
        self.started.insert(node_id.clone());
    }

    fn record_output(&mut self, node_id: NodeId, output: JsonValue) {
        self.outputs.entry(node_id).or_insert(output);
    }

    fn unprocessed(&self) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|node| !self.is_executed(&node.id))
            .map(|node| node.id.clone())
            .collect()
    }

    fn never_started(&self) -> Vec<&'g NodeSpec> {
        self.graph
            .nodes()
            .filter(|node| !self.started.contains(&node.id))
            .collect()
    }
}

/// The workflow execution engine.
///
/// Runs of the same or different workflows share nothing but the registry
/// and the store, so one engine can drive many runs concurrently.
pub struct WorkflowEngine<S: RecordStore> {
    registry: HandlerRegistry,
    store: S,
    config: EngineConfig,
}

impl<S: RecordStore> WorkflowEngine<S> {
    /// Creates an engine with the default configuration.
    pub fn new(registry: HandlerRegistry, store: S) -> Self {
        Self {
            registry,
            store,
            config: EngineConfig::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the record store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the handler registry.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stores a new pending run.
    ///
    /// # Errors
    ///
    /// Returns `RunNotPending` if the record is not pending, or a store error.
    pub async fn create_run(&self, run: ExecutionRecord) -> Result<ExecutionRecord, EngineError> {
        if run.status != RunStatus::Pending {
            return Err(EngineError::RunNotPending {
                run_id: run.id,
                status: run.status,
            });
        }
        self.store.create_run(&run).await?;
        tracing::debug!(run_id = %run.id, workflow_id = %run.workflow_id, "run created");
        Ok(run)
    }

    /// Executes a pending run of the given definition to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns an error if the run does not exist, is not pending, or the
    /// record store fails. Node failures, cycles and malformed definitions
    /// are reported through the returned [`RunOutcome`] instead.
    ///
    /// A store failure after the run started still attempts to mark the run
    /// `failed`. Dropping the returned future mid-run leaves it `running`;
    /// callers that may be dropped should drive it on a spawned task.
    #[instrument(skip(self, definition), fields(run_id = %run_id))]
    pub async fn execute(
        &self,
        run_id: WorkflowRunId,
        definition: &WorkflowDefinition,
    ) -> Result<RunOutcome, EngineError> {
        let mut run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound { run_id })?;

        if run.status != RunStatus::Pending {
            return Err(EngineError::RunNotPending {
                run_id,
                status: run.status,
            });
        }

        run.start();
        let run = self.store.update_run(&run).await?;
        if run.status != RunStatus::Running {
            // Cancelled between load and start.
            tracing::info!(status = %run.status, "run ended before starting");
            return Ok(RunOutcome {
                run_id,
                status: run.status,
                error: None,
            });
        }
        tracing::info!(nodes = definition.nodes.len(), "run started");

        match WorkflowGraph::parse(definition) {
            Ok(graph) => {
                let mut ctx = RunContext::new(&graph);
                let driven = self.drive(run_id, &mut ctx).await;
                let driven = match driven {
                    Ok(end)
                        if self.config.record_skipped_nodes
                            && !matches!(end, RunEnd::Completed) =>
                    {
                        self.record_skipped(run_id, &ctx).await.map(|()| end)
                    }
                    other => other,
                };
                match driven {
                    Ok(end) => self.finish(run, end).await,
                    Err(e) => {
                        self.abandon(run, &e).await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "definition rejected");
                self.finish(run, RunEnd::Failed(e.into())).await
            }
        }
    }

    /// Cancels a pending or running run.
    ///
    /// A running run stops before its next frontier; nodes already
    /// dispatched still record their outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the run does not exist, is already terminal, or
    /// the record store fails.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn cancel(&self, run_id: WorkflowRunId) -> Result<ExecutionRecord, EngineError> {
        let mut run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound { run_id })?;

        if run.status.is_terminal() {
            return Err(EngineError::RunNotCancellable {
                run_id,
                status: run.status,
            });
        }

        run.cancel();
        let stored = self.store.update_run(&run).await?;
        tracing::info!(status = %stored.status, "cancellation requested");
        Ok(stored)
    }

    /// Runs frontiers until the graph is exhausted or the run must stop.
    async fn drive(
        &self,
        run_id: WorkflowRunId,
        ctx: &mut RunContext<'_>,
    ) -> Result<RunEnd, EngineError> {
        if ctx.graph.start_nodes().is_empty() {
            return Ok(RunEnd::Failed(ExecutionError::NoStartNodes));
        }

        loop {
            if ctx.is_finished() {
                return Ok(RunEnd::Completed);
            }

            if self.is_cancelled(run_id).await? {
                tracing::info!("run cancelled; no further frontiers");
                return Ok(RunEnd::Cancelled);
            }

            let frontier = ctx.next_frontier();
            if frontier.is_empty() {
                return Ok(RunEnd::Failed(ExecutionError::CycleDetected {
                    unprocessed: ctx.unprocessed(),
                }));
            }

            let batch: Vec<(&NodeSpec, NodeInputs)> = frontier
                .into_iter()
                .map(|node| (node, ctx.inputs_for(&node.id)))
                .collect();
            tracing::debug!(nodes = batch.len(), "executing frontier");

            let results = match self.config.frontier_mode {
                FrontierMode::Sequential => self.run_sequential(run_id, batch).await?,
                FrontierMode::Parallel => self.run_parallel(run_id, batch).await?,
            };

            let mut failure = None;
            for (node_id, result) in results {
                ctx.mark_started(&node_id);
                match result {
                    Ok(output) => ctx.record_output(node_id, output),
                    Err(e) => {
                        failure.get_or_insert(ExecutionError::NodeFailed {
                            node_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            if let Some(failure) = failure {
                return Ok(RunEnd::Failed(failure));
            }
        }
    }

    async fn run_sequential(
        &self,
        run_id: WorkflowRunId,
        batch: Vec<(&NodeSpec, NodeInputs)>,
    ) -> Result<Vec<(NodeId, Result<JsonValue, NodeExecutionError>)>, EngineError> {
        let mut results = Vec::with_capacity(batch.len());
        for (node, inputs) in batch {
            let result = self.run_node(run_id, node, inputs).await?;
            let failed = result.is_err();
            results.push((node.id.clone(), result));
            if failed {
                break;
            }
        }
        Ok(results)
    }

    async fn run_parallel(
        &self,
        run_id: WorkflowRunId,
        batch: Vec<(&NodeSpec, NodeInputs)>,
    ) -> Result<Vec<(NodeId, Result<JsonValue, NodeExecutionError>)>, EngineError> {
        let runs = batch.into_iter().map(|(node, inputs)| async move {
            let result = self.run_node(run_id, node, inputs).await;
            (node.id.clone(), result)
        });

        join_all(runs)
            .await
            .into_iter()
            .map(|(node_id, result)| result.map(|r| (node_id, r)))
            .collect()
    }

    /// Executes one node and persists its `running` and terminal records.
    #[instrument(skip(self, node, inputs), fields(node_id = %node.id, node_type = %node.node_type))]
    async fn run_node(
        &self,
        run_id: WorkflowRunId,
        node: &NodeSpec,
        inputs: NodeInputs,
    ) -> Result<Result<JsonValue, NodeExecutionError>, EngineError> {
        let mut record = NodeExecutionRecord::running(run_id, node, &inputs);
        self.store.create_node_execution(&record).await?;

        let handler = self.registry.resolve(&node.node_type);
        let timeout = self.config.node_timeout;
        let result = match tokio::time::timeout(timeout, handler.execute(node, &inputs)).await {
            Ok(result) => result,
            Err(_) => Err(NodeExecutionError::Timeout { after: timeout }),
        };

        match &result {
            Ok(output) => {
                record.complete(output.clone());
                tracing::debug!("node completed");
            }
            Err(e) => {
                record.fail(e.to_string());
                tracing::warn!(error = %e, "node failed");
            }
        }
        self.store.update_node_execution(&record).await?;

        Ok(result)
    }

    async fn record_skipped(
        &self,
        run_id: WorkflowRunId,
        ctx: &RunContext<'_>,
    ) -> Result<(), EngineError> {
        for node in ctx.never_started() {
            let mut record = NodeExecutionRecord::new(run_id, node);
            record.skip();
            self.store.create_node_execution(&record).await?;
        }
        Ok(())
    }

    async fn is_cancelled(&self, run_id: WorkflowRunId) -> Result<bool, EngineError> {
        let run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound { run_id })?;
        Ok(run.status == RunStatus::Cancelled)
    }

    /// Best-effort terminal write after a store failure, so the run does not
    /// stay `running`.
    async fn abandon(&self, run: ExecutionRecord, cause: &EngineError) {
        let end = RunEnd::Failed(ExecutionError::Interrupted {
            reason: cause.to_string(),
        });
        if let Err(e) = self.finish(run, end).await {
            tracing::error!(error = %e, cause = %cause, "failed to mark interrupted run as failed");
        }
    }

    async fn finish(&self, mut run: ExecutionRecord, end: RunEnd) -> Result<RunOutcome, EngineError> {
        let error = match end {
            RunEnd::Completed => {
                run.complete();
                None
            }
            RunEnd::Failed(e) => {
                run.fail(e.to_string());
                Some(e)
            }
            RunEnd::Cancelled => {
                run.cancel();
                None
            }
        };

        let stored = self.store.update_run(&run).await?;
        match (&error, stored.status) {
            (Some(e), RunStatus::Failed) => tracing::warn!(error = %e, "run failed"),
            (_, status) => tracing::info!(status = %status, "run finished"),
        }

        Ok(RunOutcome {
            run_id: stored.id,
            status: stored.status,
            error: error.filter(|_| stored.status == RunStatus::Failed),
        })
    }
}
