use std::net::{IpAddr, Ipv4Addr};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use studysprint_backend::app_with_store;
use studysprint_backend::config::Config;
use studysprint_backend::store::Store;

fn test_config(exclusive: bool) -> Config {
    Config {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        log_level: "info".to_string(),
        database_url: "sqlite::memory:".to_string(),
        exclusive_sessions: exclusive,
        default_seconds_per_unit: 60.0,
        outlier_iqr_multiplier: 1.5,
        partial_observation_weight: 0.0,
    }
}

async fn test_app(exclusive: bool) -> Router {
    let store = Store::connect("sqlite::memory:").await.unwrap();
    app_with_store(test_config(exclusive), store)
}

async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_material(app: &Router, title: &str, size_units: f64) -> String {
    let (status, body) = request(
        app,
        Method::POST,
        "/api/materials",
        Some(json!({ "title": title, "sizeUnits": size_units })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn start_session(app: &Router, material_id: &str) -> String {
    let (status, body) = request(
        app,
        Method::POST,
        "/api/sessions",
        Some(json!({ "materialId": material_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "running");
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = test_app(true).await;

    let (status, body) = request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");

    let (status, body) = request(&app, Method::GET, "/api/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ready"], true);

    let (status, body) = request(&app, Method::GET, "/api/health/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["streams"]["subscribers"], 0);
}

#[tokio::test]
async fn unknown_routes_fall_through_to_404() {
    let app = test_app(true).await;
    let (status, body) = request(&app, Method::GET, "/api/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn materials_validate_and_round_trip() {
    let app = test_app(true).await;

    let (status, body) = request(
        &app,
        Method::POST,
        "/api/materials",
        Some(json!({ "title": "  ", "sizeUnits": 100.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = request(
        &app,
        Method::POST,
        "/api/materials",
        Some(json!({ "title": "Algebra", "sizeUnits": -5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let id = create_material(&app, "Algebra", 320.0).await;

    let (status, body) = request(&app, Method::GET, &format!("/api/materials/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Algebra");
    assert_eq!(body["data"]["sizeUnits"], 320.0);
    assert_eq!(body["data"]["unitLabel"], "pages");

    let (status, body) = request(&app, Method::GET, "/api/materials", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) =
        request(&app, Method::GET, "/api/materials/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn session_lifecycle_runs_end_to_end() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "Calculus", 200.0).await;
    let session_id = start_session(&app, &material_id).await;

    let (status, body) =
        request(&app, Method::GET, &format!("/api/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");
    assert_eq!(body["data"]["materialId"], material_id);

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "paused");
    assert_eq!(body["data"]["pauseCount"], 1);

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/resume"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/complete"),
        Some(json!({ "coveredUnits": 15.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["coveredUnits"], 15.0);
    assert!(body["data"]["endedAt"].is_string());

    // The finished session stays readable.
    let (status, body) =
        request(&app, Method::GET, &format!("/api/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
}

#[tokio::test]
async fn terminal_sessions_conflict_on_further_changes() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "Physics", 100.0).await;
    let session_id = start_session(&app, &material_id).await;

    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/complete"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for action in ["complete", "pause", "resume", "abandon"] {
        let (status, body) = request(
            &app,
            Method::POST,
            &format!("/api/sessions/{session_id}/{action}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT, "action {action}");
        assert_eq!(body["code"], "ALREADY_TERMINAL");
    }
}

#[tokio::test]
async fn invalid_transitions_are_conflicts() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "Physics", 100.0).await;
    let session_id = start_session(&app, &material_id).await;

    // Resuming a running session is not a valid move.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/resume"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");

    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn exclusive_mode_rejects_a_second_start() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "History", 50.0).await;
    let _session_id = start_session(&app, &material_id).await;

    let (status, body) = request(
        &app,
        Method::POST,
        "/api/sessions",
        Some(json!({ "materialId": material_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE");
}

#[tokio::test]
async fn parallel_sessions_allowed_when_not_exclusive() {
    let app = test_app(false).await;
    let material_id = create_material(&app, "History", 50.0).await;
    start_session(&app, &material_id).await;
    start_session(&app, &material_id).await;

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/sessions?materialId={material_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn starting_against_a_missing_material_is_404() {
    let app = test_app(true).await;
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/sessions",
        Some(json!({ "materialId": "ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn estimate_defaults_until_evidence_arrives() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "Statistics", 100.0).await;

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/materials/{material_id}/estimate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let estimate = &body["data"]["estimate"];
    // 100 pages at the 60 s/page default.
    assert_eq!(estimate["pointSeconds"], 6000.0);
    assert_eq!(estimate["lowConfidence"], true);
    assert_eq!(estimate["confidenceLevel"], "very_low");
    assert_eq!(estimate["formatted"], "1h 40m");
}

#[tokio::test]
async fn observations_drive_the_estimate() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "Statistics", 100.0).await;

    for duration in [500.0, 520.0, 480.0] {
        let (status, _) = request(
            &app,
            Method::POST,
            &format!("/api/materials/{material_id}/observations"),
            Some(json!({ "durationSeconds": duration, "sizeUnits": 10.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/materials/{material_id}/estimate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let estimate = &body["data"]["estimate"];
    assert_eq!(estimate["completedCount"], 3);
    assert_eq!(estimate["lowConfidence"], false);
    // About 50 s/page over 100 pages.
    assert_eq!(estimate["rateSecondsPerUnit"], 50.0);
    assert_eq!(estimate["pointSeconds"], 5000.0);
    let low = estimate["bandLowSeconds"].as_f64().unwrap();
    let high = estimate["bandHighSeconds"].as_f64().unwrap();
    assert!(low <= 5000.0 && 5000.0 <= high);

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/materials/{material_id}/observations"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn observation_payloads_are_validated() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "Statistics", 100.0).await;

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/materials/{material_id}/observations"),
        Some(json!({ "durationSeconds": -10.0, "sizeUnits": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = request(
        &app,
        Method::POST,
        "/api/materials/ghost/observations",
        Some(json!({ "durationSeconds": 10.0, "sizeUnits": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn abandoned_sessions_leave_only_partial_evidence() {
    let app = test_app(true).await;
    let material_id = create_material(&app, "Chemistry", 80.0).await;
    let session_id = start_session(&app, &material_id).await;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{session_id}/abandon"),
        Some(json!({ "coveredUnits": 4.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "abandoned");

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/materials/{material_id}/estimate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let estimate = &body["data"]["estimate"];
    assert_eq!(estimate["completedCount"], 0);
    assert_eq!(estimate["lowConfidence"], true);
}

#[tokio::test]
async fn overview_aggregates_every_material() {
    let app = test_app(true).await;
    let first = create_material(&app, "Statistics", 100.0).await;
    create_material(&app, "Biology", 50.0).await;

    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/materials/{first}/observations"),
        Some(json!({ "durationSeconds": 300.0, "sizeUnits": 10.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&app, Method::GET, "/api/estimates", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["materials"].as_array().unwrap().len(), 2);
    // 30 s/page over 100 pages plus the 60 s/page default over 50.
    assert_eq!(data["totalSeconds"], 6000.0);
    assert_eq!(data["totalFormatted"], "1h 40m");
    let mean = data["meanConfidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&mean));
    assert!(data["dailyRecommendation"]["seconds"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn session_stats_count_outcomes() {
    let app = test_app(false).await;
    let material_id = create_material(&app, "Economics", 60.0).await;

    let done = start_session(&app, &material_id).await;
    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{done}/complete"),
        Some(json!({ "coveredUnits": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let dropped = start_session(&app, &material_id).await;
    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/sessions/{dropped}/abandon"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let _live = start_session(&app, &material_id).await;

    let (status, body) = request(&app, Method::GET, "/api/sessions/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalSessions"], 3);
    assert_eq!(body["data"]["completedSessions"], 1);
    assert_eq!(body["data"]["abandonedSessions"], 1);
    assert_eq!(body["data"]["liveSessions"], 1);

    let (status, body) = request(&app, Method::GET, "/api/sessions?status=completed", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"].as_str().unwrap(), done);

    let (status, body) = request(&app, Method::GET, "/api/sessions?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
