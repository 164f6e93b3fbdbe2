//! mps-scan library interface
//!
//! Multi-modal (face + gait) person matching over camera sources, orchestrated
//! as persistent scan tasks behind an HTTP API.

pub mod api;
pub mod capabilities;
pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod models;
pub mod orchestrator;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, ScanError, ScanResult};

use axum::Router;
use chrono::{DateTime, Utc};
use mps_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::db::ScanStore;
use crate::orchestrator::ScanOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Task, result, match and profile persistence
    pub store: Arc<dyn ScanStore>,
    /// Starts, tracks and cancels scan workers
    pub orchestrator: Arc<ScanOrchestrator>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last task failure, written by the orchestrator
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, event_bus: EventBus) -> Self {
        Self {
            store: orchestrator.store().clone(),
            last_error: orchestrator.last_error().clone(),
            orchestrator,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::profile_routes())
        .merge(api::scan_routes())
        .route("/events", get(api::scan_event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
