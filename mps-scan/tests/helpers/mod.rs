//! Test helper utilities
//!
//! Fake capabilities and store wrappers shared by the mps-scan integration
//! tests. Source paths select the fake frame content:
//! `bright:N` N frames matching the target, `dark:N` N non-matching frames,
//! `slow:N` N bright frames with a 20 ms pause each, `missing` fails to open,
//! `panic` panics on open.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use mps_common::events::ScanEvent;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mps_scan::capabilities::{
    Detection, Detector, EventSink, FaceEmbedder, FallbackFaceEmbedder, FrameReader,
    FrameSourceOpener, MemoryAuditSink, Notification, Notifier, PipelineCapabilities, Reporter,
    SnapshotStore, TrackedObject, Tracker, PERSON_CLASS,
};
use mps_scan::config::{MatchingConfig, ScanConfig};
use mps_scan::db::{init_memory_pool, ScanStore, SqliteScanStore, StoredMatch};
use mps_scan::models::{
    BBox, MatchEvent, ScanStatus, ScanTask, SourceResult, SourceSpec, TargetProfile,
};
use mps_scan::orchestrator::ScanOrchestrator;
use mps_scan::{ScanError, ScanResult};

const BRIGHT: Rgb<u8> = Rgb([220, 40, 40]);
const DARK: Rgb<u8> = Rgb([40, 40, 220]);

struct Frames {
    remaining: usize,
    color: Rgb<u8>,
    pause: Option<Duration>,
}

impl FrameReader for Frames {
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        if let Some(pause) = self.pause {
            std::thread::sleep(pause);
        }
        Ok(Some(RgbImage::from_pixel(64, 48, self.color)))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.remaining as u64)
    }
}

pub struct FakeOpener;

impl FrameSourceOpener for FakeOpener {
    fn open(&self, source: &SourceSpec) -> ScanResult<Box<dyn FrameReader>> {
        let (kind, count) = source.path.split_once(':').unwrap_or((source.path.as_str(), "0"));
        let remaining: usize = count.parse().unwrap_or(0);
        let (color, pause) = match kind {
            "bright" => (BRIGHT, None),
            "dark" => (DARK, None),
            "slow" => (BRIGHT, Some(Duration::from_millis(20))),
            "panic" => panic!("decoder crashed on {}", source.id),
            _ => return Err(ScanError::SourceUnavailable(format!("{} unreachable", source.path))),
        };
        Ok(Box::new(Frames {
            remaining,
            color,
            pause,
        }))
    }
}

pub struct OnePerson;

impl Detector for OnePerson {
    fn detect(&self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        Ok(vec![Detection {
            bbox: BBox::new(10.0, 5.0, 30.0, 45.0),
            confidence: 0.9,
            class_id: PERSON_CLASS,
        }])
    }
}

pub struct ConfirmAll;

impl Tracker for ConfirmAll {
    fn update(&mut self, detections: &[Detection], _frame: &RgbImage) -> Vec<TrackedObject> {
        detections
            .iter()
            .enumerate()
            .map(|(i, d)| TrackedObject {
                track_id: i as i64 + 1,
                bbox: d.bbox,
                confirmed: true,
            })
            .collect()
    }
}

/// Red-dominant crops embed like the target profile
pub struct ColorFace;

impl FaceEmbedder for ColorFace {
    fn name(&self) -> &str {
        "color"
    }

    fn embed(&self, image: &RgbImage) -> anyhow::Result<Option<Vec<f32>>> {
        let p = image.get_pixel(0, 0);
        Ok(Some(if p.0[0] > p.0[2] {
            vec![1.0, 0.0]
        } else {
            vec![0.0, 1.0]
        }))
    }
}

#[derive(Default)]
pub struct NullSnapshots;

impl SnapshotStore for NullSnapshots {
    fn save_match(
        &self,
        task_id: i64,
        source_id: &str,
        frame_index: u64,
        track_id: i64,
        _frame: &RgbImage,
        _bbox: &BBox,
    ) -> anyhow::Result<String> {
        Ok(format!("mem://{}/{}/{}/{}", task_id, source_id, frame_index, track_id))
    }

    fn save_detection(
        &self,
        _task_id: i64,
        _source_id: &str,
        _frame_index: u64,
        _track_id: i64,
        _crop: &RgbImage,
    ) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

#[derive(Default)]
pub struct RecordingEvents(Mutex<Vec<ScanEvent>>);

impl RecordingEvents {
    pub fn events(&self) -> Vec<ScanEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for RecordingEvents {
    fn publish(&self, event: ScanEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(String, usize)>>,
    pub aggregates: Mutex<Vec<(i64, u32)>>,
    /// Task status as the aggregate report saw it
    pub aggregate_statuses: Mutex<Vec<ScanStatus>>,
    /// Panic inside the worker instead of writing a source report
    pub panic_on_report: bool,
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(
        &self,
        task: &ScanTask,
        result: &SourceResult,
        matches: &[MatchEvent],
    ) -> anyhow::Result<String> {
        if self.panic_on_report {
            panic!("report writer crashed on {}", result.source_id);
        }
        self.reports
            .lock()
            .unwrap()
            .push((result.source_id.clone(), matches.len()));
        Ok(format!("mem://task_{}/{}", task.id, result.source_id))
    }

    async fn aggregate_report(
        &self,
        task: &ScanTask,
        _results: &[SourceResult],
        total_detections: u32,
    ) -> anyhow::Result<String> {
        self.aggregates.lock().unwrap().push((task.id, total_detections));
        self.aggregate_statuses.lock().unwrap().push(task.status);
        Ok(format!("mem://task_{}/aggregate", task.id))
    }
}

pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub deliver: bool,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            deliver: true,
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> bool {
        self.sent.lock().unwrap().push(notification.clone());
        self.deliver
    }
}

/// SQLite store that fails the next N `increment_scanned` calls
///
/// With `complete_before_cancel` another writer completes the task just
/// before any cancellation reaches the row.
pub struct FlakyStore {
    inner: SqliteScanStore,
    increment_failures: AtomicU32,
    complete_before_cancel: bool,
}

impl FlakyStore {
    pub fn new(inner: SqliteScanStore, increment_failures: u32) -> Self {
        Self {
            inner,
            increment_failures: AtomicU32::new(increment_failures),
            complete_before_cancel: false,
        }
    }

    pub fn completing_before_cancel(inner: SqliteScanStore) -> Self {
        Self {
            complete_before_cancel: true,
            ..Self::new(inner, 0)
        }
    }
}

#[async_trait]
impl ScanStore for FlakyStore {
    async fn save_profile(&self, profile: &TargetProfile) -> mps_common::Result<i64> {
        self.inner.save_profile(profile).await
    }

    async fn load_profile(&self, id: i64) -> mps_common::Result<Option<TargetProfile>> {
        self.inner.load_profile(id).await
    }

    async fn create_task(&self, task: &ScanTask) -> mps_common::Result<i64> {
        self.inner.create_task(task).await
    }

    async fn load_task(&self, id: i64) -> mps_common::Result<Option<ScanTask>> {
        self.inner.load_task(id).await
    }

    async fn mark_in_progress(&self, id: i64) -> mps_common::Result<bool> {
        self.inner.mark_in_progress(id).await
    }

    async fn increment_scanned(&self, id: i64) -> mps_common::Result<Option<u32>> {
        let pending = self.increment_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.increment_failures.store(pending - 1, Ordering::SeqCst);
            return Err(mps_common::Error::Internal("database is locked".to_string()));
        }
        self.inner.increment_scanned(id).await
    }

    async fn finish_task(
        &self,
        id: i64,
        status: ScanStatus,
        aggregate_report: Option<&str>,
        error_message: Option<&str>,
    ) -> mps_common::Result<bool> {
        if self.complete_before_cancel && status == ScanStatus::Cancelled {
            self.inner.mark_in_progress(id).await?;
            self.inner
                .finish_task(id, ScanStatus::Completed, Some("mem://aggregate"), None)
                .await?;
        }
        self.inner
            .finish_task(id, status, aggregate_report, error_message)
            .await
    }

    async fn record_source_result(
        &self,
        task_id: i64,
        position: usize,
        result: &SourceResult,
    ) -> mps_common::Result<()> {
        self.inner.record_source_result(task_id, position, result).await
    }

    async fn source_results(&self, task_id: i64) -> mps_common::Result<Vec<SourceResult>> {
        self.inner.source_results(task_id).await
    }

    async fn record_match(&self, task_id: i64, event: &MatchEvent) -> mps_common::Result<i64> {
        self.inner.record_match(task_id, event).await
    }

    async fn matches_for_task(&self, task_id: i64) -> mps_common::Result<Vec<StoredMatch>> {
        self.inner.matches_for_task(task_id).await
    }

    async fn total_detections(&self, task_id: i64) -> mps_common::Result<u32> {
        self.inner.total_detections(task_id).await
    }

    async fn fail_stale_tasks(&self) -> mps_common::Result<u64> {
        self.inner.fail_stale_tasks().await
    }
}

pub fn source(id: &str, path: &str) -> SourceSpec {
    SourceSpec {
        id: id.to_string(),
        name: format!("Camera {}", id),
        path: path.to_string(),
        location: Some(format!("Gate {}", id)),
    }
}

pub fn fake_capabilities(
    events: Arc<dyn EventSink>,
    audit: Arc<MemoryAuditSink>,
) -> PipelineCapabilities {
    PipelineCapabilities {
        detector: Arc::new(OnePerson),
        trackers: Arc::new(|| Box::new(ConfirmAll) as Box<dyn Tracker>),
        face: Arc::new(FallbackFaceEmbedder::new(vec![Arc::new(ColorFace)])),
        gait: None,
        frames: Arc::new(FakeOpener),
        snapshots: Arc::new(NullSnapshots),
        audit,
        events,
    }
}

pub fn test_scan_config() -> ScanConfig {
    ScanConfig {
        persistence_retry_delay_ms: 1,
        ..ScanConfig::default()
    }
}

/// Orchestrator wired with fakes, plus handles on what it produced
pub struct Harness {
    pub store: Arc<dyn ScanStore>,
    pub events: Arc<RecordingEvents>,
    pub reporter: Arc<RecordingReporter>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<MemoryAuditSink>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub profile_id: i64,
}

impl Harness {
    pub async fn new() -> Self {
        let store = SqliteScanStore::new(init_memory_pool().await.unwrap());
        Self::with_store(Arc::new(store)).await
    }

    pub async fn with_store(store: Arc<dyn ScanStore>) -> Self {
        Self::build(store, RecordingNotifier::default(), RecordingReporter::default()).await
    }

    pub async fn with_notifier(notifier: RecordingNotifier) -> Self {
        let store = SqliteScanStore::new(init_memory_pool().await.unwrap());
        Self::build(Arc::new(store), notifier, RecordingReporter::default()).await
    }

    pub async fn with_reporter(reporter: RecordingReporter) -> Self {
        let store = SqliteScanStore::new(init_memory_pool().await.unwrap());
        Self::build(Arc::new(store), RecordingNotifier::default(), reporter).await
    }

    async fn build(
        store: Arc<dyn ScanStore>,
        notifier: RecordingNotifier,
        reporter: RecordingReporter,
    ) -> Self {
        let events = Arc::new(RecordingEvents::default());
        let reporter = Arc::new(reporter);
        let notifier = Arc::new(notifier);
        let audit = Arc::new(MemoryAuditSink::new());

        let profile = TargetProfile::new("target", Some(vec![1.0, 0.0]), None).unwrap();
        let profile_id = store.save_profile(&profile).await.unwrap();

        let orchestrator = Arc::new(ScanOrchestrator::new(
            store.clone(),
            reporter.clone(),
            notifier.clone(),
            fake_capabilities(events.clone(), audit.clone()),
            MatchingConfig::default(),
            test_scan_config(),
        ));

        Self {
            store,
            events,
            reporter,
            notifier,
            audit,
            orchestrator,
            profile_id,
        }
    }

    /// Poll until the task's worker has exited, then return the task
    pub async fn wait_terminal(&self, task_id: i64) -> ScanTask {
        for _ in 0..500 {
            if !self.orchestrator.workers().is_tracked(task_id).await {
                let task = self.store.load_task(task_id).await.unwrap().unwrap();
                assert!(task.is_terminal(), "worker exited with task {} {}", task_id, task.status);
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached a terminal status", task_id);
    }

    /// Events published for one task, in order
    pub fn task_events(&self, task_id: i64) -> Vec<ScanEvent> {
        self.events
            .events()
            .into_iter()
            .filter(|e| e.task_id() == task_id)
            .collect()
    }

    /// Poll until the task has scanned at least `count` sources
    pub async fn wait_scanned(&self, task_id: i64, count: u32) {
        for _ in 0..500 {
            let task = self.store.load_task(task_id).await.unwrap().unwrap();
            if task.scanned_count >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never scanned {} sources", task_id, count);
    }
}
