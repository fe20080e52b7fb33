use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::clock::SessionType;
use crate::realtime;
use crate::response::{AppError, SuccessResponse};
use crate::state::AppState;

use super::clock_error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(start_session))
        .route("/:id", get(get_session))
        .route("/:id/pause", post(pause_session))
        .route("/:id/resume", post(resume_session))
        .route("/:id/complete", post(complete_session))
        .route("/:id/abandon", post(abandon_session))
        .route("/:id/stream", get(realtime::session_stream))
        .route("/stats", get(session_stats))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSession {
    material_id: String,
    #[serde(default)]
    session_type: Option<String>,
    #[serde(default)]
    planned_units: Option<f64>,
}

async fn start_session(
    State(state): State<AppState>,
    Json(body): Json<StartSession>,
) -> Result<impl IntoResponse, AppError> {
    let session_type = match body.session_type.as_deref() {
        None => SessionType::default(),
        Some(raw) => SessionType::parse(raw)
            .ok_or_else(|| AppError::validation(format!("unknown session type: {raw}")))?,
    };
    if let Some(units) = body.planned_units {
        if units <= 0.0 || !units.is_finite() {
            return Err(AppError::validation("plannedUnits must be a positive number"));
        }
    }

    let snapshot = state
        .clock()
        .start(&body.material_id, session_type, body.planned_units)
        .await
        .map_err(clock_error)?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(snapshot))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    material_id: Option<String>,
    status: Option<String>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            crate::clock::SessionStatus::parse(raw)
                .ok_or_else(|| AppError::validation(format!("unknown status: {raw}")))?,
        ),
    };

    let mut sessions = state
        .clock()
        .list(query.material_id.as_deref())
        .await
        .map_err(clock_error)?;
    if let Some(status) = status {
        sessions.retain(|s| s.status == status);
    }
    Ok(Json(SuccessResponse::new(sessions)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.clock().snapshot(&id).await.map_err(clock_error)?;
    Ok(Json(SuccessResponse::new(snapshot)))
}

async fn pause_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.clock().pause(&id).await.map_err(clock_error)?;
    Ok(Json(SuccessResponse::new(snapshot)))
}

async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.clock().resume(&id).await.map_err(clock_error)?;
    Ok(Json(SuccessResponse::new(snapshot)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishSession {
    #[serde(default)]
    covered_units: Option<f64>,
}

async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<FinishSession>>,
) -> Result<impl IntoResponse, AppError> {
    let covered = validate_covered(body)?;
    let snapshot = state
        .clock()
        .complete(&id, covered)
        .await
        .map_err(clock_error)?;
    Ok(Json(SuccessResponse::new(snapshot)))
}

async fn abandon_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<FinishSession>>,
) -> Result<impl IntoResponse, AppError> {
    let covered = validate_covered(body)?;
    let snapshot = state
        .clock()
        .abandon(&id, covered)
        .await
        .map_err(clock_error)?;
    Ok(Json(SuccessResponse::new(snapshot)))
}

fn validate_covered(body: Option<Json<FinishSession>>) -> Result<Option<f64>, AppError> {
    let covered = body.and_then(|Json(b)| b.covered_units);
    if let Some(units) = covered {
        if units < 0.0 || !units.is_finite() {
            return Err(AppError::validation("coveredUnits must not be negative"));
        }
    }
    Ok(covered)
}

/// Aggregate numbers across all recorded sessions.
async fn session_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.clock().list(None).await.map_err(clock_error)?;
    let total = sessions.len();
    let completed = sessions
        .iter()
        .filter(|s| s.status == crate::clock::SessionStatus::Completed)
        .count();
    let abandoned = sessions
        .iter()
        .filter(|s| s.status == crate::clock::SessionStatus::Abandoned)
        .count();
    let active_seconds: f64 = sessions.iter().map(|s| s.active_seconds).sum();
    let covered_units: f64 = sessions.iter().map(|s| s.covered_units).sum();

    Ok(Json(SuccessResponse::new(json!({
        "totalSessions": total,
        "completedSessions": completed,
        "abandonedSessions": abandoned,
        "liveSessions": total - completed - abandoned,
        "activeSeconds": active_seconds,
        "coveredUnits": covered_units,
    }))))
}
