/// Run inspection and cancellation endpoints

use crate::api::error::{ApiError, ApiResult};
use crate::api::workflows::AppState;
use crate::runtime::run::RunRecord;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs", get(list_active_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
}

/// GET /api/runs
/// Returns the ids of runs currently in flight
async fn list_active_runs(State(state): State<AppState>) -> Json<Value> {
    let active = state.engine.active_runs().await;
    Json(json!({ "active": active }))
}

/// GET /api/runs/{id}
async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<RunRecord>> {
    state
        .registry
        .repository()
        .load_run_record(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run '{}'", id)))
}

/// POST /api/runs/{id}/cancel
///
/// Takes effect at the next node visit; an action in progress finishes or times out first.
async fn cancel_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    if !state.engine.cancel(id).await {
        return Err(ApiError::NotFound(format!("no active run '{}'", id)));
    }
    Ok(Json(json!({ "runId": id, "message": "Cancellation requested" })))
}
