//! Scan task API handlers
//!
//! POST /scans, GET /scans/{id}, GET /scans/{id}/matches,
//! POST /scans/{id}/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{
    db::StoredMatch,
    error::{ApiError, ApiResult},
    models::{ScanStatus, SourceResult, SourceSpec},
    AppState,
};

/// POST /scans request
#[derive(Debug, Deserialize)]
pub struct CreateScanRequest {
    #[serde(default)]
    pub case_id: String,
    pub profile_id: i64,
    pub sources: Vec<SourceSpec>,
}

/// POST /scans response
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateScanResponse {
    pub task_id: i64,
    pub status: ScanStatus,
    pub total_count: u32,
}

/// GET /scans/{id} response
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanStatusResponse {
    pub task_id: i64,
    pub case_id: String,
    pub profile_id: i64,
    pub status: ScanStatus,
    pub scanned_count: u32,
    pub total_count: u32,
    pub progress_percent: f64,
    pub source_results: Vec<SourceResult>,
    pub aggregate_report: Option<String>,
    pub total_detections: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// POST /scans/{id}/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelScanResponse {
    pub task_id: i64,
    pub status: ScanStatus,
}

/// POST /scans
///
/// Persists the task and starts its worker. Returns 202 with the task id
/// before any source is scanned.
pub async fn create_scan(
    State(state): State<AppState>,
    Json(request): Json<CreateScanRequest>,
) -> ApiResult<(StatusCode, Json<CreateScanResponse>)> {
    if request.sources.is_empty() {
        return Err(ApiError::BadRequest("Source list must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for source in &request.sources {
        if source.id.trim().is_empty() {
            return Err(ApiError::BadRequest("Source id must not be empty".to_string()));
        }
        if !seen.insert(source.id.as_str()) {
            return Err(ApiError::BadRequest(format!("Duplicate source id: {}", source.id)));
        }
    }

    let total_count = request.sources.len() as u32;
    let task_id = state
        .orchestrator
        .submit(&request.case_id, request.profile_id, request.sources)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateScanResponse {
            task_id,
            status: ScanStatus::Pending,
            total_count,
        }),
    ))
}

/// GET /scans/{id}
pub async fn get_scan(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<ScanStatusResponse>> {
    let task = state
        .store
        .load_task(task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan task not found: {}", task_id)))?;
    let source_results = state.store.source_results(task_id).await?;
    let total_detections = state.store.total_detections(task_id).await?;

    tracing::debug!(task_id, status = %task.status, "Status query");

    Ok(Json(ScanStatusResponse {
        task_id: task.id,
        progress_percent: task.progress_percent(),
        case_id: task.case_id,
        profile_id: task.profile_id,
        status: task.status,
        scanned_count: task.scanned_count,
        total_count: task.total_count,
        source_results,
        aggregate_report: task.aggregate_report,
        total_detections,
        error_message: task.error_message,
        created_at: task.created_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
    }))
}

/// GET /scans/{id}/matches
pub async fn get_scan_matches(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Vec<StoredMatch>>> {
    if state.store.load_task(task_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Scan task not found: {}", task_id)));
    }
    Ok(Json(state.store.matches_for_task(task_id).await?))
}

/// POST /scans/{id}/cancel
///
/// 409 when the task already reached a terminal status.
pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<CancelScanResponse>)> {
    let status = state.orchestrator.cancel(task_id).await?;
    tracing::info!(task_id, "Scan cancel requested via API");
    Ok((StatusCode::ACCEPTED, Json(CancelScanResponse { task_id, status })))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scans", post(create_scan))
        .route("/scans/:id", get(get_scan))
        .route("/scans/:id/matches", get(get_scan_matches))
        .route("/scans/:id/cancel", post(cancel_scan))
}
