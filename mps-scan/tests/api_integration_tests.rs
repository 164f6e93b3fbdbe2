//! Integration tests for mps-scan API endpoints

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use helpers::{source, FlakyStore, Harness};
use http_body_util::BodyExt;
use mps_common::events::EventBus;
use mps_scan::db::{init_memory_pool, SqliteScanStore};
use std::sync::Arc;
use serde_json::{json, Value};
use std::time::Duration;
use tower::util::ServiceExt;

/// Test helper: router over an orchestrator wired with fakes
async fn create_test_app() -> (axum::Router, Harness) {
    app_for(Harness::new().await)
}

fn app_for(harness: Harness) -> (axum::Router, Harness) {
    let state = mps_scan::AppState::new(harness.orchestrator.clone(), EventBus::new(16));
    (mps_scan::build_router(state), harness)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn wait_for_status(app: &axum::Router, task_id: i64, wanted: &str) -> Value {
    for _ in 0..500 {
        let (status, body) = send(app, "GET", &format!("/scans/{}", task_id), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", task_id, wanted);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _h) = create_test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "mps-scan");
    assert_eq!(body["running_scans"], 0);
    assert_eq!(body["max_concurrent_scans"], 2);
}

#[tokio::test]
async fn test_health_reports_face_usage_and_last_failure() {
    let store = SqliteScanStore::new(init_memory_pool().await.unwrap());
    let (app, h) = app_for(Harness::with_store(Arc::new(FlakyStore::new(store, 2))).await);

    let (_, body) = send(&app, "GET", "/health", None).await;
    assert!(body.get("last_error").is_none());
    assert_eq!(body["face_embedding"]["enabled"], true);
    assert_eq!(body["face_embedding"]["backends"][0]["name"], "color");
    assert_eq!(body["face_embedding"]["backends"][0]["hits"], 0);

    let task_id = h
        .orchestrator
        .submit("case-h", h.profile_id, vec![source("a", "dark:1"), source("b", "dark:1")])
        .await
        .unwrap();
    wait_for_status(&app, task_id, "failed").await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let last_error = body["last_error"].as_str().unwrap();
    assert!(last_error.contains(&format!("task {}", task_id)));
    assert!(last_error.contains("database is locked"));
    assert_eq!(body["face_embedding"]["backends"][0]["hits"], 1);
    assert_eq!(body["face_embedding"]["misses"], 0);
}

#[tokio::test]
async fn test_create_and_get_profile() {
    let (app, _h) = create_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/profiles",
        Some(json!({"name": "suspect", "face_embedding": [0.1, 0.2, 0.3]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["face_dimensions"], 3);
    assert!(body["gait_dimensions"].is_null());

    let id = body["profile_id"].as_i64().unwrap();
    let (status, body) = send(&app, "GET", &format!("/profiles/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "suspect");
}

#[tokio::test]
async fn test_profile_without_embedding_rejected() {
    let (app, _h) = create_test_app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/profiles",
        Some(json!({"name": "nobody", "face_embedding": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "TARGET_PROFILE_MISSING");

    let (status, _) = send(&app, "GET", "/profiles/77", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scan_round_trip() {
    let (app, h) = create_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/scans",
        Some(json!({
            "case_id": "case-api",
            "profile_id": h.profile_id,
            "sources": [
                {"id": "a", "name": "North", "path": "bright:2", "location": "North gate"},
                {"id": "b", "name": "South", "path": "missing"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["total_count"], 2);
    let task_id = body["task_id"].as_i64().unwrap();

    let body = wait_for_status(&app, task_id, "completed").await;
    assert_eq!(body["scanned_count"], 2);
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["progress_percent"], 100.0);
    assert_eq!(body["total_detections"], 2);
    assert_eq!(body["source_results"][0]["status"], "ok");
    assert_eq!(body["source_results"][1]["status"], "unavailable");
    assert!(body["aggregate_report"].is_string());

    let (status, matches) = send(&app, "GET", &format!("/scans/{}/matches", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let matches = matches.as_array().unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0]["source_id"], "a");
    assert_eq!(matches[0]["task_id"], task_id);

    // Wait for the worker to release the task before cancelling
    h.wait_terminal(task_id).await;
    let (status, body) = send(&app, "POST", &format!("/scans/{}/cancel", task_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_cancel_running_scan() {
    let (app, h) = create_test_app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/scans",
        Some(json!({
            "profile_id": h.profile_id,
            "sources": [{"id": "a", "name": "Lobby", "path": "slow:500"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_i64().unwrap();

    let (status, body) = send(&app, "POST", &format!("/scans/{}/cancel", task_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "cancelled");

    let body = wait_for_status(&app, task_id, "cancelled").await;
    assert_eq!(body["source_results"][0]["status"], "skipped");
}

#[tokio::test]
async fn test_invalid_scan_requests() {
    let (app, h) = create_test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/scans",
        Some(json!({"profile_id": h.profile_id, "sources": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/scans",
        Some(json!({
            "profile_id": h.profile_id,
            "sources": [
                {"id": "a", "name": "A", "path": "dark:1"},
                {"id": "a", "name": "A again", "path": "dark:1"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        "/scans",
        Some(json!({"profile_id": 404, "sources": [{"id": "a", "name": "A", "path": "dark:1"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "TARGET_PROFILE_MISSING");

    let (status, _) = send(&app, "GET", "/scans/12345", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/scans/12345/matches", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", "/scans/12345/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
