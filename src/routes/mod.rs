pub mod health;
pub mod materials;
pub mod sessions;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::clock::ClockError;
use crate::response::{json_error, AppError};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .nest("/api/health", health::router())
        .nest("/api/materials", materials::router())
        .nest("/api/sessions", sessions::router())
        .route("/api/estimates", get(materials::estimates_overview))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::not_found("route not found")
}

/// Map clock failures onto the HTTP error vocabulary.
pub(crate) fn clock_error(err: ClockError) -> AppError {
    match &err {
        ClockError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
        }
        ClockError::ExclusiveSessionActive { .. } => {
            json_error(StatusCode::CONFLICT, "INVALID_STATE", err.to_string())
        }
        ClockError::AlreadyTerminal { .. } => {
            json_error(StatusCode::CONFLICT, "ALREADY_TERMINAL", err.to_string())
        }
        ClockError::SessionNotFound(_) | ClockError::MaterialNotFound(_) => {
            AppError::not_found(err.to_string())
        }
        ClockError::Store(inner) => AppError::dependency(inner.to_string()),
    }
}
