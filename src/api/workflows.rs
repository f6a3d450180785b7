/// Workflow management REST API endpoints
///
/// CRUD over workflow definitions with hot-reload: every save compiles the definition first,
/// so an invalid workflow is rejected with 422 and never stored. Saves and deletes keep the
/// registry and the cron schedule in step.

use crate::api::error::{ApiError, ApiResult};
use crate::runtime::{CronSchedulerService, EventIngestor, ExecutionEngine};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::{TriggerEvent, Workflow};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Hot-reload registry, backed by the repository
    pub registry: Arc<WorkflowRegistry>,
    pub engine: ExecutionEngine,
    pub ingestor: EventIngestor,
    /// Cron scheduler service for background job management
    pub scheduler: Arc<CronSchedulerService>,
}

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub version: u32,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: Workflow,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/run", post(run_workflow))
}

/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "tenantId": "...", "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<WorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowResponse>)> {
    let workflow = payload.workflow;
    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(ApiError::BadRequest("workflow id and name are required".into()));
    }

    if state.registry.repository().get_workflow(&workflow.id).await?.is_some() {
        return Err(ApiError::Conflict(format!("workflow '{}' already exists", workflow.id)));
    }

    let graph = state.registry.save(workflow).await?;
    state.scheduler.sync_workflow(&graph).await?;

    tracing::info!("🔥 Created workflow: {} ({})", graph.id(), graph.workflow().name);
    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id: graph.id().to_string(),
            version: graph.workflow().version,
            message: format!("Workflow '{}' created successfully", graph.workflow().name),
        }),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let workflows = state.registry.repository().list_workflows().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Workflow>> {
    state
        .registry
        .repository()
        .get_workflow(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("workflow '{}'", id)))
}

/// PUT /api/workflows/{id}
///
/// The stored version is bumped when the body does not carry a newer one.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowRequest>,
) -> ApiResult<Json<WorkflowResponse>> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();
    if workflow.name.is_empty() {
        return Err(ApiError::BadRequest("workflow name is required".into()));
    }

    let existing = state
        .registry
        .repository()
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow '{}'", id)))?;
    if workflow.version <= existing.version {
        workflow.version = existing.version + 1;
    }

    let graph = state.registry.save(workflow).await?;
    state.scheduler.sync_workflow(&graph).await?;

    tracing::info!("🔥 Hot-reloaded workflow: {} (v{})", graph.id(), graph.workflow().version);
    Ok(Json(WorkflowResponse {
        id: graph.id().to_string(),
        version: graph.workflow().version,
        message: format!("Workflow '{}' updated successfully", graph.workflow().name),
    }))
}

/// DELETE /api/workflows/{id}
///
/// Runs already in flight finish on the graph they started with.
async fn delete_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.scheduler.remove_workflow(&id).await;

    if !state.registry.remove(&id).await? {
        return Err(ApiError::NotFound(format!("workflow '{}'", id)));
    }

    tracing::info!("🗑️ Deleted workflow: {}", id);
    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}

/// POST /api/workflows/{id}/run
///
/// Starts a run regardless of trigger type and status; the body becomes the `data` namespace.
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let graph = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("workflow '{}'", id)))?;

    let payload = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid JSON payload: {}", e)))?
    };
    let handle = state.engine.spawn(graph, TriggerEvent::manual(&id, payload)).await;

    tracing::info!("▶️ Manual run {} of workflow {}", handle.run_id, id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "runId": handle.run_id, "workflowId": id })),
    ))
}
