//! Capability interfaces consumed by the matching engine and orchestrator
//!
//! Model-backed capabilities (detection, tracking, embeddings) are synchronous
//! and run on blocking threads. Capabilities that talk to the outside world
//! (reports, notifications) are async.

pub mod audit;
pub mod event_sink;
pub mod face;
pub mod frame_source;
pub mod notifier;
pub mod reporter;
pub mod snapshot;
pub mod tracker;
#[cfg(feature = "video")]
pub mod video;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::BBox;

pub use audit::{AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use event_sink::EventSink;
pub use face::{FaceEmbedder, FallbackFaceEmbedder};
pub use frame_source::{FrameReader, FrameSourceOpener, ImageSequenceOpener, MediaSourceOpener};
#[cfg(feature = "video")]
pub use video::VideoFileOpener;
pub use notifier::{LogNotifier, Notification, Notifier, WebhookNotifier};
pub use reporter::{JsonReporter, Reporter};
pub use snapshot::{FsSnapshotStore, SnapshotStore};
pub use tracker::{IouTracker, IouTrackerConfig};

/// COCO class id for "person"
pub const PERSON_CLASS: u32 = 0;

/// Raw detector output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: u32,
}

/// Tracker output for one object in one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub track_id: i64,
    pub bbox: BBox,
    pub confirmed: bool,
}

/// Object detector
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>>;
}

/// Multi-object tracker, one instance per source run
pub trait Tracker: Send {
    fn update(&mut self, detections: &[Detection], frame: &RgbImage) -> Vec<TrackedObject>;
}

/// Creates a fresh [`Tracker`] for every source run
pub trait TrackerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Tracker>;
}

impl<F> TrackerFactory for F
where
    F: Fn() -> Box<dyn Tracker> + Send + Sync,
{
    fn create(&self) -> Box<dyn Tracker> {
        self()
    }
}

/// Detector used when no detection backend is wired in
///
/// Every call fails, so every source ends as a per-source error.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredDetector;

impl Detector for UnconfiguredDetector {
    fn detect(&self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        anyhow::bail!("no detection backend configured")
    }
}

/// Gait embedder over an ordered silhouette sequence
pub trait GaitEmbedder: Send + Sync {
    fn embed(&self, silhouettes: &[GrayImage]) -> anyhow::Result<Option<Vec<f32>>>;
}

/// Synchronous capabilities handed to each source pipeline
#[derive(Clone)]
pub struct PipelineCapabilities {
    pub detector: Arc<dyn Detector>,
    pub trackers: Arc<dyn TrackerFactory>,
    pub face: Arc<FallbackFaceEmbedder>,
    pub gait: Option<Arc<dyn GaitEmbedder>>,
    pub frames: Arc<dyn FrameSourceOpener>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub audit: Arc<dyn AuditSink>,
    pub events: Arc<dyn EventSink>,
}
