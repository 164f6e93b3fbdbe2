//! Error types for mps-scan
//!
//! [`ScanError`] classifies failures inside the matching engine and the scan
//! orchestrator. [`ApiError`] is what HTTP handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Scan engine error taxonomy
///
/// Only `TargetProfileMissing` and a `Persistence` failure that survives its
/// retry end a task as `failed`. Everything else is absorbed at the source
/// boundary or logged and ignored.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Source could not be opened or read at all
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// No usable face or gait embedding for a crop
    #[error("Embedding extraction failed: {0}")]
    EmbeddingExtraction(String),

    /// The task references no usable target profile
    #[error("Target profile missing: {0}")]
    TargetProfileMissing(String),

    /// Any failure escaping a single source run, panics included
    #[error("Source failed: {0}")]
    SourceFailure(String),

    /// Store write or read failed after retry
    #[error("Persistence failure: {0}")]
    Persistence(#[from] mps_common::Error),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Report generation failed: {0}")]
    Reporting(String),

    /// Buffer operation on a track that was never upserted
    #[error("Unknown track: {0}")]
    UnknownTrack(i64),

    /// Cooperative cancellation observed
    #[error("Scan cancelled")]
    Cancelled,

    /// Per-source deadline exceeded
    #[error("Source exceeded {0}s deadline")]
    TimedOut(u64),

    /// Rejected task status change
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Result type for scan engine operations
pub type ScanResult<T> = Result<T, ScanError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. cancelling a finished task
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] mps_common::Error),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => match err {
                mps_common::Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                mps_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", err.to_string()),
            },
            ApiError::Scan(ref err) => match err {
                ScanError::Persistence(mps_common::Error::NotFound(msg)) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                ScanError::TargetProfileMissing(_) => {
                    (StatusCode::BAD_REQUEST, "TARGET_PROFILE_MISSING", err.to_string())
                }
                ScanError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "SCAN_ERROR", err.to_string()),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
