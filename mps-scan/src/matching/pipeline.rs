//! Single-source matching pipeline
//!
//! `opening → processing → {completed, unavailable, error}`. The run is
//! synchronous and meant for a blocking thread; cancellation and the
//! deadline are checked between frames.

use chrono::Utc;
use image::RgbImage;
use mps_common::events::ScanEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detection::filter_person_detections;
use super::fusion::{FusionEngine, FusionVerdict};
use super::silhouette::{crop_region, silhouette_from_crop};
use super::track_buffer::TrackBufferManager;
use crate::capabilities::{PipelineCapabilities, TrackedObject, Tracker};
use crate::config::MatchingConfig;
use crate::error::{ScanError, ScanResult};
use crate::models::{AuditRecord, MatchEvent, SourceSpec, TargetProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Opening,
    Processing,
    Completed,
    Unavailable,
    Error,
}

/// What a completed run reports back
#[derive(Debug, Clone, Default)]
pub struct SourceRunSummary {
    /// Frames read from the source, strided-out frames included
    pub frames_read: u64,
    /// Frames that went through detection
    pub frames_processed: u64,
    /// Confirmed track/frame pairs evaluated
    pub evaluations: u64,
    pub matches: Vec<MatchEvent>,
}

impl SourceRunSummary {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}

pub struct SourcePipeline {
    task_id: i64,
    source: SourceSpec,
    config: Arc<MatchingConfig>,
    caps: PipelineCapabilities,
    fusion: FusionEngine,
    buffers: TrackBufferManager,
    cancel: CancellationToken,
    deadline: Option<(Instant, u64)>,
    state: PipelineState,
    last_crop_frame: Option<u64>,
}

impl SourcePipeline {
    pub fn new(
        task_id: i64,
        source: SourceSpec,
        config: Arc<MatchingConfig>,
        target: Arc<TargetProfile>,
        caps: PipelineCapabilities,
        cancel: CancellationToken,
    ) -> Self {
        let fusion = FusionEngine::new(config.clone(), target, caps.gait.clone());
        let buffers = TrackBufferManager::from_config(&config);
        Self {
            task_id,
            source,
            config,
            caps,
            fusion,
            buffers,
            cancel,
            deadline: None,
            state: PipelineState::Opening,
            last_crop_frame: None,
        }
    }

    /// Bound the run's wall-clock time, measured from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout.as_secs()));
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Drive the source to the end
    ///
    /// `SourceUnavailable` means the source never opened. `Cancelled`,
    /// `TimedOut` and `SourceFailure` end a run that was processing.
    pub fn run(&mut self) -> ScanResult<SourceRunSummary> {
        self.state = PipelineState::Opening;
        let mut reader = match self.caps.frames.open(&self.source) {
            Ok(reader) => reader,
            Err(e) => {
                self.state = PipelineState::Unavailable;
                return Err(match e {
                    ScanError::SourceUnavailable(message) => ScanError::SourceUnavailable(message),
                    other => ScanError::SourceUnavailable(other.to_string()),
                });
            }
        };

        self.state = PipelineState::Processing;
        info!(
            task_id = self.task_id,
            source_id = %self.source.id,
            frames = ?reader.len_hint(),
            "Source processing started"
        );

        let mut tracker = self.caps.trackers.create();
        let mut summary = SourceRunSummary::default();
        let stride = self.config.frame_stride.max(1);

        loop {
            if let Err(e) = self.check_interrupts() {
                return Err(self.fail(e));
            }

            let frame = match reader.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    return Err(self.fail(ScanError::SourceFailure(format!(
                        "frame {} unreadable: {}",
                        summary.frames_read + 1,
                        e
                    ))))
                }
            };
            summary.frames_read += 1;
            let frame_index = summary.frames_read;
            if frame_index % stride != 0 {
                continue;
            }

            if let Err(e) = self.process_frame(frame_index, &frame, tracker.as_mut(), &mut summary) {
                return Err(self.fail(e));
            }
            summary.frames_processed += 1;
        }

        self.state = PipelineState::Completed;
        info!(
            task_id = self.task_id,
            source_id = %self.source.id,
            frames_processed = summary.frames_processed,
            matches = summary.match_count(),
            "Source processing completed"
        );
        Ok(summary)
    }

    fn fail(&mut self, error: ScanError) -> ScanError {
        self.state = PipelineState::Error;
        error
    }

    fn check_interrupts(&self) -> ScanResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if let Some((deadline, secs)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ScanError::TimedOut(secs));
            }
        }
        Ok(())
    }

    fn process_frame(
        &mut self,
        frame_index: u64,
        frame: &RgbImage,
        tracker: &mut dyn Tracker,
        summary: &mut SourceRunSummary,
    ) -> ScanResult<()> {
        let started = Instant::now();

        let raw = self.caps.detector.detect(frame).map_err(|e| {
            ScanError::SourceFailure(format!("detector failed at frame {}: {}", frame_index, e))
        })?;
        let persons = filter_person_detections(&raw, frame.width(), frame.height(), &self.config);
        let tracked = tracker.update(&persons, frame);

        for object in tracked.iter().filter(|t| t.confirmed) {
            self.evaluate_track(frame_index, frame, object, summary)?;
        }

        let evicted = self.buffers.evict_stale(frame_index);
        if !evicted.is_empty() {
            debug!(source_id = %self.source.id, frame_index, evicted = ?evicted, "Evicted stale tracks");
        }

        debug!(
            source_id = %self.source.id,
            frame_index,
            detections = persons.len(),
            active_tracks = self.buffers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frame processed"
        );
        Ok(())
    }

    fn evaluate_track(
        &mut self,
        frame_index: u64,
        frame: &RgbImage,
        object: &TrackedObject,
        summary: &mut SourceRunSummary,
    ) -> ScanResult<()> {
        let track_id = object.track_id;
        self.buffers.upsert(track_id, object.bbox, frame_index);

        let Some(crop) = crop_region(frame, &object.bbox) else {
            // Nothing inside the frame to embed
            summary.evaluations += 1;
            self.audit(frame_index, object, None, None);
            return Ok(());
        };

        self.archive_crop(frame_index, track_id, &crop);

        if let Some(face) = self.caps.face.embed(&crop) {
            self.buffers.append_face_embedding(track_id, face.vector)?;
            self.buffers.set_face_backend(track_id, face.backend);
        }
        self.buffers.append_silhouette(track_id, silhouette_from_crop(&crop))?;

        let track = self
            .buffers
            .get(track_id)
            .ok_or(ScanError::UnknownTrack(track_id))?;
        let verdict = self.fusion.evaluate(track);
        let face_backend = track.face_backend.clone();

        let saved_crop_reference = if verdict.matched {
            let reference = self.save_snapshot(frame_index, track_id, frame, object);
            let event = self.match_event(frame_index, object, &verdict, reference.clone(), face_backend);
            info!(
                task_id = self.task_id,
                source_id = %self.source.id,
                frame_index,
                track_id,
                fused_score = ?verdict.fused_score,
                decided_by = ?verdict.decided_by,
                "Match found"
            );
            self.caps.events.publish(ScanEvent::MatchFound {
                task_id: self.task_id,
                source_id: self.source.id.clone(),
                track_id,
                frame_index,
                fused_score: verdict.fused_score.unwrap_or_default(),
                snapshot_path: reference.clone(),
                timestamp: event.timestamp,
            });
            summary.matches.push(event);
            reference
        } else {
            None
        };

        summary.evaluations += 1;
        self.audit(frame_index, object, Some(&verdict), saved_crop_reference);
        Ok(())
    }

    /// Append one track/frame evaluation; `None` verdict means no evidence
    fn audit(
        &self,
        frame_index: u64,
        object: &TrackedObject,
        verdict: Option<&FusionVerdict>,
        saved_crop_reference: Option<String>,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            source_id: self.source.id.clone(),
            frame_index,
            track_id: object.track_id,
            bbox: object.bbox.as_array(),
            face_similarity: verdict.and_then(|v| v.face_similarity),
            gait_similarity: verdict.and_then(|v| v.gait_similarity),
            fused_score: verdict.and_then(|v| v.fused_score),
            matched: verdict.is_some_and(|v| v.matched),
            saved_crop_reference: saved_crop_reference.unwrap_or_default(),
        };
        if let Err(e) = self.caps.audit.record(self.task_id, &record) {
            warn!(task_id = self.task_id, error = %e, "Audit record dropped");
        }
    }

    fn archive_crop(&mut self, frame_index: u64, track_id: i64, crop: &RgbImage) {
        let interval = self.config.detection_crop_interval;
        if interval == 0 {
            return;
        }
        if let Some(last) = self.last_crop_frame {
            if frame_index.saturating_sub(last) < interval {
                return;
            }
        }
        self.last_crop_frame = Some(frame_index);
        if let Err(e) =
            self.caps
                .snapshots
                .save_detection(self.task_id, &self.source.id, frame_index, track_id, crop)
        {
            warn!(source_id = %self.source.id, frame_index, error = %e, "Detection crop not saved");
        }
    }

    fn save_snapshot(
        &self,
        frame_index: u64,
        track_id: i64,
        frame: &RgbImage,
        object: &TrackedObject,
    ) -> Option<String> {
        match self.caps.snapshots.save_match(
            self.task_id,
            &self.source.id,
            frame_index,
            track_id,
            frame,
            &object.bbox,
        ) {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(source_id = %self.source.id, frame_index, track_id, error = %e, "Match snapshot not saved");
                None
            }
        }
    }

    fn match_event(
        &self,
        frame_index: u64,
        object: &TrackedObject,
        verdict: &FusionVerdict,
        saved_crop_reference: Option<String>,
        face_backend: Option<String>,
    ) -> MatchEvent {
        MatchEvent {
            source_id: self.source.id.clone(),
            frame_index,
            track_id: object.track_id,
            bbox: object.bbox,
            face_similarity: verdict.face_similarity,
            gait_similarity: verdict.gait_similarity,
            fused_score: verdict.fused_score,
            matched: verdict.matched,
            saved_crop_reference,
            face_backend,
            timestamp: Utc::now(),
        }
    }
}
