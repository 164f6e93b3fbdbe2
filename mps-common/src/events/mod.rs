//! Scan lifecycle events
//!
//! Events are published on an [`EventBus`] by the scan orchestrator and fan
//! out to SSE clients and the event log. Publishing never blocks a scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Outcome of a single source within a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Source was opened and every frame was processed
    Ok,
    /// Source could not be opened
    Unavailable,
    /// Source failed during processing (error, panic or deadline)
    Error,
    /// Source was never started because the scan was cancelled
    Skipped,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::Unavailable => "unavailable",
            SourceStatus::Error => "error",
            SourceStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(SourceStatus::Ok),
            "unavailable" => Some(SourceStatus::Unavailable),
            "error" => Some(SourceStatus::Error),
            "skipped" => Some(SourceStatus::Skipped),
            _ => None,
        }
    }
}

/// Scan lifecycle event
///
/// Serialized with a `type` tag so SSE clients can dispatch on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// Task moved to in_progress
    ScanStarted {
        task_id: i64,
        total_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A source finished and the scanned count advanced
    ScanProgress {
        task_id: i64,
        scanned_count: u32,
        total_count: u32,
        progress_percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// A track crossed the fused threshold
    MatchFound {
        task_id: i64,
        source_id: String,
        track_id: i64,
        frame_index: u64,
        fused_score: f64,
        snapshot_path: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Per-source outcome recorded
    SourceFinished {
        task_id: i64,
        source_id: String,
        status: SourceStatus,
        detections: u32,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Task reached completed
    ScanCompleted {
        task_id: i64,
        total_detections: u32,
        timestamp: DateTime<Utc>,
    },

    /// Task reached failed
    ScanFailed {
        task_id: i64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Task reached cancelled
    ScanCancelled {
        task_id: i64,
        scanned_count: u32,
        timestamp: DateTime<Utc>,
    },
}

impl ScanEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::ScanStarted { .. } => "ScanStarted",
            ScanEvent::ScanProgress { .. } => "ScanProgress",
            ScanEvent::MatchFound { .. } => "MatchFound",
            ScanEvent::SourceFinished { .. } => "SourceFinished",
            ScanEvent::ScanCompleted { .. } => "ScanCompleted",
            ScanEvent::ScanFailed { .. } => "ScanFailed",
            ScanEvent::ScanCancelled { .. } => "ScanCancelled",
        }
    }

    /// Task the event belongs to
    pub fn task_id(&self) -> i64 {
        match self {
            ScanEvent::ScanStarted { task_id, .. }
            | ScanEvent::ScanProgress { task_id, .. }
            | ScanEvent::MatchFound { task_id, .. }
            | ScanEvent::SourceFinished { task_id, .. }
            | ScanEvent::ScanCompleted { task_id, .. }
            | ScanEvent::ScanFailed { task_id, .. }
            | ScanEvent::ScanCancelled { task_id, .. } => *task_id,
        }
    }
}

/// Central event distribution bus
///
/// Wraps a `tokio::sync::broadcast` channel:
/// - Publishing never waits on subscribers
/// - Slow subscribers observe `Lagged` and skip ahead
///
/// ```
/// use mps_common::events::{EventBus, ScanEvent};
///
/// let bus = EventBus::new(64);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(ScanEvent::ScanStarted {
///     task_id: 1,
///     total_count: 3,
///     timestamp: chrono::Utc::now(),
/// });
/// assert_eq!(rx.try_recv().unwrap().task_id(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers that received it
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ScanEvent) -> Result<usize, broadcast::error::SendError<ScanEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
