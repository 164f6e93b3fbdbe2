//! Server-Sent Events for scan progress and live matches

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;

use crate::AppState;

/// GET /events query string
#[derive(Debug, Default, Deserialize)]
pub struct EventStreamQuery {
    /// Only forward events of this task
    pub task_id: Option<i64>,
}

/// GET /events - SSE stream of scan events
///
/// Streams `ScanStarted`, `ScanProgress`, `MatchFound`, `SourceFinished`,
/// `ScanCompleted`, `ScanFailed` and `ScanCancelled`.
pub async fn scan_event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bus.subscribe();
    mps_common::sse::scan_event_sse_stream("mps-scan", rx, query.task_id)
}
