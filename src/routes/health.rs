use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::response::{AppError, SuccessResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/info", get(info))
}

pub async fn health() -> impl IntoResponse {
    Json(SuccessResponse::new(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn live() -> impl IntoResponse {
    Json(SuccessResponse::new(json!({ "alive": true })))
}

/// Readiness includes a round trip to the database.
async fn ready(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state
        .store()
        .ping()
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?;
    Ok(Json(SuccessResponse::new(json!({ "ready": true }))))
}

async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.hub().stats().await;
    Json(SuccessResponse::new(json!({
        "startedAt": state.started_at().to_rfc3339(),
        "uptimeSeconds": state.uptime_seconds(),
        "streams": hub,
    })))
}
