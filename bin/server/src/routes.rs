//! HTTP routes for workflows and executions.

use crate::db::WorkflowRecord;
use crate::error::{ApiError, WorkflowError};
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use nodeweave_core::{WorkflowId, WorkflowRunId};
use nodeweave_workflow::{
    ExecutionRecord, RecordStore, RunFilter, RunStatus, TriggerType, WorkflowDefinition,
    WorkflowGraph,
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type ApiResult = Result<(StatusCode, Json<JsonValue>), ApiError>;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/workflows", post(create_workflow))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/versions", post(add_version))
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/logs", get(execution_logs))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
        .route(
            "/api/executions/workflows/{workflow_id}/execute",
            post(start_execution),
        )
        .route("/api/engine/execute/{execution_id}", post(run_execution))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_id<T>(raw: &str, resource: &str) -> Result<T, ApiError>
where
    T: FromStr,
{
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid {resource} id: {raw}")))
}

/// Parses and validates a definition; a definition the engine would reject
/// as malformed is never stored.
fn validate_definition(value: &JsonValue) -> Result<WorkflowDefinition, ApiError> {
    let definition = WorkflowDefinition::from_json(value)?;
    WorkflowGraph::parse(&definition)?;
    Ok(definition)
}

async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
struct CreateWorkflowRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    definition: JsonValue,
    #[serde(default)]
    notes: Option<String>,
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("Workflow name is required"));
    }
    let definition = validate_definition(&request.definition)?;

    let workflow = WorkflowRecord::new(request.name, request.description);
    let version = state
        .workflows
        .create(&workflow, definition, request.notes)
        .await?;
    tracing::info!(workflow_id = %workflow.id, "workflow created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "workflow": workflow, "version": version })),
    ))
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let workflow_id: WorkflowId = parse_id(&id, "workflow")?;
    let workflow = state
        .workflows
        .find_by_id(workflow_id)
        .await?
        .ok_or(WorkflowError::NotFound { id })?;
    let latest_version = state.workflows.latest_version(workflow_id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "workflow": workflow, "latest_version": latest_version })),
    ))
}

#[derive(Debug, Deserialize)]
struct AddVersionRequest {
    definition: JsonValue,
    #[serde(default)]
    notes: Option<String>,
}

async fn add_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddVersionRequest>,
) -> ApiResult {
    let workflow_id: WorkflowId = parse_id(&id, "workflow")?;
    let definition = validate_definition(&request.definition)?;

    let version = state
        .workflows
        .add_version(workflow_id, definition, request.notes)
        .await?;
    tracing::info!(
        workflow_id = %workflow_id,
        version = version.version_number,
        "workflow version added"
    );

    Ok((StatusCode::CREATED, Json(json!({ "version": version }))))
}

async fn start_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult {
    let workflow_id: WorkflowId = parse_id(&workflow_id, "workflow")?;
    state
        .workflows
        .find_by_id(workflow_id)
        .await?
        .ok_or(WorkflowError::NotFound {
            id: workflow_id.to_string(),
        })?;
    let version = state
        .workflows
        .latest_version(workflow_id)
        .await?
        .ok_or_else(|| ApiError::bad_request("Workflow has no versions"))?;

    let run = state
        .engine
        .create_run(ExecutionRecord::new(
            workflow_id,
            version.id,
            TriggerType::Manual,
        ))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Workflow execution started",
            "execution": run.to_json(),
        })),
    ))
}

async fn run_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult {
    let run_id: WorkflowRunId = parse_id(&execution_id, "execution")?;
    let store = state.engine.store();
    let run = store
        .load_run(run_id)
        .await?
        .ok_or(ApiError::NotFound {
            resource: "execution",
            id: execution_id,
        })?;
    if run.status != RunStatus::Pending {
        return Err(ApiError::bad_request(format!(
            "Execution is already in {} state",
            run.status
        )));
    }

    let version = state
        .workflows
        .find_version(run.workflow_version_id)
        .await?
        .ok_or(WorkflowError::VersionNotFound {
            id: run.workflow_version_id.to_string(),
        })?;

    // The run owns its own task so a dropped request cannot strand it in `running`.
    let engine = Arc::clone(&state.engine);
    let definition = version.definition;
    let outcome = tokio::spawn(async move { engine.execute(run_id, &definition).await })
        .await
        .map_err(|e| ApiError::Internal {
            details: format!("execution task for {run_id} failed: {e}"),
        })??;
    let execution = store
        .load_run(run_id)
        .await?
        .map_or(JsonValue::Null, |run| run.to_json());

    let (status, message) = match (outcome.status, &outcome.error) {
        (RunStatus::Completed, _) => (StatusCode::OK, "Workflow executed successfully".to_string()),
        (RunStatus::Cancelled, _) => (
            StatusCode::CONFLICT,
            "Workflow execution was cancelled".to_string(),
        ),
        (_, Some(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Workflow execution failed: {error}"),
        ),
        (_, None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Workflow execution failed".to_string(),
        ),
    };

    Ok((
        status,
        Json(json!({ "message": message, "execution": execution })),
    ))
}

#[derive(Debug, Deserialize)]
struct ListExecutionsQuery {
    workflow_id: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> ApiResult {
    let workflow_id = query
        .workflow_id
        .as_deref()
        .map(|id| parse_id::<WorkflowId>(id, "workflow"))
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(|status| {
            status
                .parse::<RunStatus>()
                .map_err(|e| ApiError::bad_request(e.to_string()))
        })
        .transpose()?;

    let filter = RunFilter {
        workflow_id,
        status,
        limit: query.limit,
    };
    let runs = state.engine.store().list_runs(&filter).await?;
    let executions: Vec<JsonValue> = runs.iter().map(ExecutionRecord::to_json).collect();

    Ok((StatusCode::OK, Json(json!({ "executions": executions }))))
}

async fn get_execution(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let run_id: WorkflowRunId = parse_id(&id, "execution")?;
    let run = state
        .engine
        .store()
        .load_run(run_id)
        .await?
        .ok_or(ApiError::NotFound {
            resource: "execution",
            id,
        })?;

    Ok((StatusCode::OK, Json(json!({ "execution": run.to_json() }))))
}

async fn execution_logs(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let run_id: WorkflowRunId = parse_id(&id, "execution")?;
    let store = state.engine.store();
    if store.load_run(run_id).await?.is_none() {
        return Err(ApiError::NotFound {
            resource: "execution",
            id,
        });
    }

    let logs: Vec<JsonValue> = store
        .list_node_executions(run_id)
        .await?
        .iter()
        .map(|record| record.to_json())
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({ "execution_id": run_id, "logs": logs })),
    ))
}

async fn cancel_execution(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let run_id: WorkflowRunId = parse_id(&id, "execution")?;
    let run = state.engine.cancel(run_id).await?;

    let message = if run.status == RunStatus::Cancelled {
        "Execution cancelled".to_string()
    } else {
        format!("Execution finished as {} before it could be cancelled", run.status)
    };
    Ok((
        StatusCode::OK,
        Json(json!({ "message": message, "execution": run.to_json() })),
    ))
}
