//! Server-Sent Events (SSE) utilities

use crate::events::ScanEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Heartbeat interval for idle SSE connections
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Convert a scan event into an SSE frame
///
/// Returns `None` if the event cannot be serialized.
pub fn scan_event_frame(event: &ScanEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: failed to serialize {}: {}", event.event_type(), e);
            None
        }
    }
}

/// Stream scan events from a broadcast receiver to an SSE client
///
/// Sends a `ConnectionStatus` frame first, then forwards events. When
/// `task_filter` is set only that task's events are forwarded. A lagging
/// client skips the dropped events and keeps its connection.
pub fn scan_event_sse_stream(
    service_name: &'static str,
    mut rx: broadcast::Receiver<ScanEvent>,
    task_filter: Option<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} scan events", service_name);

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        if task_filter.is_some_and(|id| id != event.task_id()) {
                            continue;
                        }
                        if let Some(frame) = scan_event_frame(&event) {
                            yield Ok(frame);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("SSE: client lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("SSE: {} event bus closed", service_name);
                        break;
                    }
                },
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}
