//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("mps-scan")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Git commit the binary was built from
    pub git_hash: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Scan workers currently holding a slot
    pub running_scans: usize,
    /// Worker slots available in total
    pub max_concurrent_scans: usize,
    /// Event stream subscribers
    pub sse_clients: usize,
    /// Face embedding chain usage since startup
    pub face_embedding: FaceEmbeddingHealth,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Face fallback chain state
#[derive(Debug, Serialize)]
pub struct FaceEmbeddingHealth {
    /// False when no backend is configured; matching then relies on gait
    pub enabled: bool,
    /// Embeddings produced per backend, in fallback order
    pub backends: Vec<FaceBackendHits>,
    /// Crops no backend could embed
    pub misses: u64,
}

#[derive(Debug, Serialize)]
pub struct FaceBackendHits {
    pub name: String,
    pub hits: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();
    let workers = state.orchestrator.workers();
    let face = state.orchestrator.face_embedder();
    let (backends, misses) = face.stats();
    let face_embedding = FaceEmbeddingHealth {
        enabled: face.is_enabled(),
        backends: backends
            .into_iter()
            .map(|(name, hits)| FaceBackendHits { name, hits })
            .collect(),
        misses,
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "mps-scan".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("MPS_GIT_HASH").to_string(),
        uptime_seconds,
        running_scans: workers.running(),
        max_concurrent_scans: workers.max_concurrent(),
        sse_clients: state.event_bus.subscriber_count(),
        face_embedding,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
