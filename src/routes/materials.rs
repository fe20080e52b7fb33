use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::estimation::{format_duration, Estimate};
use crate::response::{AppError, SuccessResponse};
use crate::state::AppState;
use crate::store::{timestamp, MaterialRecord, ObservationRecord};

use super::clock_error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_materials).post(create_material))
        .route("/:id", get(get_material))
        .route("/:id/estimate", get(material_estimate))
        .route("/:id/observations", post(create_observation).get(list_observations))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMaterial {
    title: String,
    #[serde(default)]
    material_type: Option<String>,
    size_units: f64,
    #[serde(default)]
    unit_label: Option<String>,
}

async fn create_material(
    State(state): State<AppState>,
    Json(body): Json<CreateMaterial>,
) -> Result<impl IntoResponse, AppError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    if body.size_units <= 0.0 || !body.size_units.is_finite() {
        return Err(AppError::validation("sizeUnits must be a positive number"));
    }

    let material = MaterialRecord {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        material_type: body.material_type.unwrap_or_else(|| "book".to_string()),
        size_units: body.size_units,
        unit_label: body.unit_label.unwrap_or_else(|| "pages".to_string()),
        created_at: timestamp(Utc::now()),
    };
    state
        .store()
        .insert_material(&material)
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?;

    Ok((StatusCode::CREATED, Json(SuccessResponse::new(material))))
}

async fn list_materials(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let materials = state
        .store()
        .list_materials()
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?;
    Ok(Json(SuccessResponse::new(materials)))
}

async fn get_material(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let material = state
        .store()
        .get_material(&id)
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?
        .ok_or_else(|| AppError::not_found(format!("material not found: {id}")))?;
    Ok(Json(SuccessResponse::new(material)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MaterialEstimate {
    material: MaterialRecord,
    estimate: Estimate,
}

async fn material_estimate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (material, estimate) = state.clock().estimate_for(&id).await.map_err(clock_error)?;
    Ok(Json(SuccessResponse::new(MaterialEstimate {
        material,
        estimate,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateObservation {
    duration_seconds: f64,
    size_units: f64,
    #[serde(default)]
    partial: bool,
}

/// Record pace evidence directly, e.g. imported from another tracker.
async fn create_observation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateObservation>,
) -> Result<impl IntoResponse, AppError> {
    if body.duration_seconds <= 0.0 || !body.duration_seconds.is_finite() {
        return Err(AppError::validation("durationSeconds must be a positive number"));
    }
    if body.size_units <= 0.0 || !body.size_units.is_finite() {
        return Err(AppError::validation("sizeUnits must be a positive number"));
    }
    state
        .store()
        .get_material(&id)
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?
        .ok_or_else(|| AppError::not_found(format!("material not found: {id}")))?;

    let observation = ObservationRecord {
        id: Uuid::new_v4().to_string(),
        material_id: id,
        session_id: None,
        duration_seconds: body.duration_seconds,
        size_units: body.size_units,
        partial: body.partial,
        created_at: timestamp(Utc::now()),
    };
    state
        .store()
        .insert_observation(&observation)
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(json!({ "id": observation.id }))),
    ))
}

async fn list_observations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .store()
        .get_material(&id)
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?
        .ok_or_else(|| AppError::not_found(format!("material not found: {id}")))?;

    let observations = state
        .store()
        .observations_for_material(&id)
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?;
    let rows: Vec<serde_json::Value> = observations
        .iter()
        .map(|o| {
            json!({
                "id": o.id,
                "sessionId": o.session_id,
                "durationSeconds": o.duration_seconds,
                "sizeUnits": o.size_units,
                "partial": o.partial,
                "createdAt": o.created_at,
            })
        })
        .collect();
    Ok(Json(SuccessResponse::new(rows)))
}

/// Roll-up across every material: per-material estimates plus a suggested
/// daily pace to clear the whole backlog in a week.
pub async fn estimates_overview(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let materials = state
        .store()
        .list_materials()
        .await
        .map_err(|err| AppError::dependency(err.to_string()))?;

    let mut entries = Vec::with_capacity(materials.len());
    let mut total_seconds = 0.0;
    let mut confidence_sum = 0.0;
    for material in materials {
        let (material, estimate) = state
            .clock()
            .estimate_for(&material.id)
            .await
            .map_err(clock_error)?;
        total_seconds += estimate.point_seconds;
        confidence_sum += estimate.confidence;
        entries.push(MaterialEstimate { material, estimate });
    }

    let mean_confidence = if entries.is_empty() {
        0.0
    } else {
        confidence_sum / entries.len() as f64
    };
    let daily_seconds = total_seconds / 7.0;
    Ok(Json(SuccessResponse::new(json!({
        "materials": entries,
        "totalSeconds": total_seconds,
        "totalFormatted": format_duration(total_seconds),
        "meanConfidence": mean_confidence,
        "dailyRecommendation": {
            "seconds": daily_seconds,
            "formatted": format_duration(daily_seconds),
        },
    }))))
}
