/// Event intake endpoint
///
/// Stream consumers (or anything else that can POST) hand trigger events to the ingestor, which
/// starts one run per ACTIVE workflow subscribed to the event's topic and type.

use crate::api::error::{ApiError, ApiResult};
use crate::api::workflows::AppState;
use crate::workflow::types::TriggerEvent;
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde_json::{json, Value};

pub fn create_event_routes() -> Router<AppState> {
    Router::new().route("/api/events", post(publish_event))
}

/// POST /api/events
/// Body: { "topic": "...", "eventType": "...", "payload": { ... } }
/// Returns: { "runs": [{ "runId": "..." }] }
async fn publish_event(
    State(state): State<AppState>,
    Json(event): Json<TriggerEvent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if event.topic.is_empty() || event.event_type.is_empty() {
        return Err(ApiError::BadRequest("topic and eventType are required".into()));
    }

    tracing::info!("📥 Event received: {}/{}", event.topic, event.event_type);
    let handles = state.ingestor.ingest(event).await;
    let runs: Vec<Value> = handles
        .iter()
        .map(|handle| json!({ "runId": handle.run_id }))
        .collect();

    Ok((StatusCode::ACCEPTED, Json(json!({ "runs": runs }))))
}
