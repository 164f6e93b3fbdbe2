//! Multi-source scan orchestrator
//!
//! Runs the matching pipeline over a task's sources strictly in order,
//! isolating per-source failures, persisting progress, reporting and
//! notifying. Tasks run as independent background workers.

pub mod worker_pool;

use chrono::Utc;
use futures::FutureExt;
use mps_common::events::ScanEvent;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capabilities::{EventSink, FallbackFaceEmbedder, Notification, Notifier, PipelineCapabilities, Reporter};
use crate::config::{MatchingConfig, ScanConfig};
use crate::db::ScanStore;
use crate::error::{ScanError, ScanResult};
use crate::matching::SourcePipeline;
use crate::models::{
    progress_percent, MatchEvent, ScanStatus, ScanTask, SourceResult, SourceSpec, SourceStatus,
    TargetProfile,
};
use crate::utils::retry_once;

pub use worker_pool::WorkerPool;

/// Outcome of one source inside a task
struct SourceOutcome {
    result: SourceResult,
    matches: Vec<MatchEvent>,
    cancelled: bool,
}

pub struct ScanOrchestrator {
    store: Arc<dyn ScanStore>,
    reporter: Arc<dyn Reporter>,
    notifier: Arc<dyn Notifier>,
    caps: PipelineCapabilities,
    matching: Arc<MatchingConfig>,
    scan: ScanConfig,
    workers: WorkerPool,
    last_error: Arc<RwLock<Option<String>>>,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn ScanStore>,
        reporter: Arc<dyn Reporter>,
        notifier: Arc<dyn Notifier>,
        caps: PipelineCapabilities,
        matching: MatchingConfig,
        scan: ScanConfig,
    ) -> Self {
        let workers = WorkerPool::new(scan.max_concurrent_scans);
        Self {
            store,
            reporter,
            notifier,
            caps,
            matching: Arc::new(matching),
            scan,
            workers,
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Message of the most recent failed task, shared with the health check
    pub fn last_error(&self) -> &Arc<RwLock<Option<String>>> {
        &self.last_error
    }

    pub fn face_embedder(&self) -> &FallbackFaceEmbedder {
        self.caps.face.as_ref()
    }

    fn events(&self) -> &dyn EventSink {
        self.caps.events.as_ref()
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.scan.persistence_retry_delay_ms)
    }

    /// Persist a `pending` task and start its worker; returns the task id
    /// without waiting for the scan
    ///
    /// Fails with `TargetProfileMissing` before anything is persisted when
    /// the profile does not exist.
    pub async fn submit(
        self: &Arc<Self>,
        case_id: &str,
        profile_id: i64,
        sources: Vec<SourceSpec>,
    ) -> ScanResult<i64> {
        let profile = retry_once("load_profile", self.retry_delay(), || {
            self.store.load_profile(profile_id)
        })
        .await?;
        if profile.is_none() {
            return Err(ScanError::TargetProfileMissing(format!(
                "profile {} does not exist",
                profile_id
            )));
        }

        let task = ScanTask::new(case_id, profile_id, sources);
        let task_id = retry_once("create_task", self.retry_delay(), || self.store.create_task(&task)).await?;

        let cancel = self.workers.register(task_id).await;
        info!(task_id, case_id, total_count = task.total_count, "Scan task created");

        let orchestrator = Arc::clone(self);
        self.workers.spawn(task_id, async move {
            info!(task_id, "Background scan worker started");
            let outcome = AssertUnwindSafe(orchestrator.run_task(task_id, cancel))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(status)) => info!(task_id, status = %status, "Background scan worker finished"),
                Ok(Err(e)) => error!(task_id, error = %e, "Background scan worker failed"),
                Err(_) => {
                    orchestrator.close_audit(task_id);
                    let e = ScanError::SourceFailure("scan worker panicked".to_string());
                    orchestrator.fail_task(task_id, e).await;
                }
            }
        });

        Ok(task_id)
    }

    /// Cooperatively cancel a task
    ///
    /// Returns `InvalidTransition` if the task already finished.
    pub async fn cancel(&self, task_id: i64) -> ScanResult<ScanStatus> {
        let task = self
            .store
            .load_task(task_id)
            .await?
            .ok_or_else(|| mps_common::Error::NotFound(format!("Scan task {}", task_id)))?;

        if task.is_terminal() {
            return Err(ScanError::InvalidTransition {
                from: task.status.to_string(),
                to: ScanStatus::Cancelled.to_string(),
            });
        }

        if self.workers.cancel(task_id).await {
            info!(task_id, "Cancellation requested");
            return Ok(ScanStatus::Cancelled);
        }

        self.cancel_untracked(&task).await
    }

    /// Cancel a task no worker of this process holds
    ///
    /// A task that reached a terminal status since `task` was read is left
    /// untouched and reported as `InvalidTransition`.
    async fn cancel_untracked(&self, task: &ScanTask) -> ScanResult<ScanStatus> {
        let task_id = task.id;
        let cancelled = self
            .store
            .finish_task(task_id, ScanStatus::Cancelled, None, Some("cancelled while not running"))
            .await?;
        if !cancelled {
            let current = self
                .store
                .load_task(task_id)
                .await?
                .map(|t| t.status)
                .unwrap_or(task.status);
            return Err(ScanError::InvalidTransition {
                from: current.to_string(),
                to: ScanStatus::Cancelled.to_string(),
            });
        }

        self.record_skipped(task, 0, "scan cancelled").await?;
        info!(task_id, "Untracked scan cancelled");
        self.events().publish(ScanEvent::ScanCancelled {
            task_id,
            scanned_count: task.scanned_count,
            timestamp: Utc::now(),
        });
        Ok(ScanStatus::Cancelled)
    }

    /// Worker body: run every source of `task_id` to a terminal state
    pub async fn run_task(&self, task_id: i64, cancel: CancellationToken) -> ScanResult<ScanStatus> {
        let result = self.run_task_inner(task_id, &cancel).await;
        self.close_audit(task_id);
        match result {
            Ok(status) => Ok(status),
            Err(e) => Err(self.fail_task(task_id, e).await),
        }
    }

    fn close_audit(&self, task_id: i64) {
        if let Err(e) = self.caps.audit.close(task_id) {
            warn!(task_id, error = %e, "Audit log not flushed");
        }
    }

    async fn run_task_inner(&self, task_id: i64, cancel: &CancellationToken) -> ScanResult<ScanStatus> {
        let task = retry_once("load_task", self.retry_delay(), || self.store.load_task(task_id))
            .await?
            .ok_or_else(|| mps_common::Error::NotFound(format!("Scan task {}", task_id)))?;

        if task.is_terminal() {
            return Ok(task.status);
        }

        let profile = retry_once("load_profile", self.retry_delay(), || {
            self.store.load_profile(task.profile_id)
        })
        .await?
        .ok_or_else(|| {
            ScanError::TargetProfileMissing(format!("profile {} does not exist", task.profile_id))
        })?;
        let profile = Arc::new(profile);

        if cancel.is_cancelled() {
            return self.finish_cancelled(&task, 0).await;
        }

        retry_once("mark_in_progress", self.retry_delay(), || self.store.mark_in_progress(task_id)).await?;
        info!(task_id, case_id = %task.case_id, total_count = task.total_count, "Scan started");
        self.events().publish(ScanEvent::ScanStarted {
            task_id,
            total_count: task.total_count,
            timestamp: Utc::now(),
        });

        let mut scanned_count = 0u32;
        for (position, source) in task.sources.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(&task, position).await;
            }

            let outcome = self.scan_source(&task, source, &profile, cancel).await;
            self.persist_outcome(&task, position, &outcome).await?;

            // An interrupted source was not scanned
            if outcome.cancelled {
                return self.finish_cancelled(&task, position + 1).await;
            }

            if let Some(count) =
                retry_once("increment_scanned", self.retry_delay(), || self.store.increment_scanned(task_id))
                    .await?
            {
                scanned_count = count;
            }
            self.events().publish(ScanEvent::ScanProgress {
                task_id,
                scanned_count,
                total_count: task.total_count,
                progress_percent: progress_percent(scanned_count, task.total_count),
                timestamp: Utc::now(),
            });

            if let Some(first) = outcome.matches.first() {
                self.notify_match(&task, source, first, outcome.matches.len()).await;
            }
        }

        self.finish_completed(&task).await
    }

    /// Run one source on a blocking thread; never fails
    async fn scan_source(
        &self,
        task: &ScanTask,
        source: &SourceSpec,
        profile: &Arc<TargetProfile>,
        cancel: &CancellationToken,
    ) -> SourceOutcome {
        info!(task_id = task.id, source_id = %source.id, source = %source.name, "Scanning source");
        let started = Instant::now();

        let pipeline = SourcePipeline::new(
            task.id,
            source.clone(),
            self.matching.clone(),
            profile.clone(),
            self.caps.clone(),
            cancel.clone(),
        )
        .with_timeout(Duration::from_secs(self.scan.source_timeout_secs));

        let joined = tokio::task::spawn_blocking(move || {
            let mut pipeline = pipeline;
            pipeline.run()
        })
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (result, matches, cancelled) = match joined {
            Ok(Ok(summary)) => {
                let result = SourceResult::ok(
                    &source.id,
                    &source.name,
                    summary.match_count() as u32,
                    summary.frames_processed,
                    duration_ms,
                );
                let report = match self.reporter.report(task, &result, &summary.matches).await {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        let e = ScanError::Reporting(e.to_string());
                        warn!(task_id = task.id, source_id = %source.id, error = %e, "Source report not written");
                        None
                    }
                };
                (result.with_report(report), summary.matches, false)
            }
            Ok(Err(ScanError::SourceUnavailable(message))) => {
                warn!(task_id = task.id, source_id = %source.id, reason = %message, "Source unavailable");
                (SourceResult::unavailable(&source.id, &source.name, message), Vec::new(), false)
            }
            Ok(Err(ScanError::Cancelled)) => {
                info!(task_id = task.id, source_id = %source.id, "Source interrupted by cancellation");
                (
                    SourceResult::skipped(&source.id, &source.name, "cancelled during processing"),
                    Vec::new(),
                    true,
                )
            }
            Ok(Err(e)) => {
                warn!(task_id = task.id, source_id = %source.id, error = %e, "Source failed");
                (
                    SourceResult::error(&source.id, &source.name, e.to_string(), duration_ms),
                    Vec::new(),
                    false,
                )
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("source pipeline panicked: {}", panic_message(join_error.into_panic()))
                } else {
                    format!("source pipeline aborted: {}", join_error)
                };
                let e = ScanError::SourceFailure(message);
                error!(task_id = task.id, source_id = %source.id, error = %e, "Source failed");
                (
                    SourceResult::error(&source.id, &source.name, e.to_string(), duration_ms),
                    Vec::new(),
                    false,
                )
            }
        };

        SourceOutcome {
            result,
            matches,
            cancelled,
        }
    }

    async fn persist_outcome(&self, task: &ScanTask, position: usize, outcome: &SourceOutcome) -> ScanResult<()> {
        for event in &outcome.matches {
            retry_once("record_match", self.retry_delay(), || self.store.record_match(task.id, event)).await?;
        }
        retry_once("record_source_result", self.retry_delay(), || {
            self.store.record_source_result(task.id, position, &outcome.result)
        })
        .await?;

        self.events().publish(ScanEvent::SourceFinished {
            task_id: task.id,
            source_id: outcome.result.source_id.clone(),
            status: outcome.result.status,
            detections: outcome.result.detections_found,
            message: outcome.result.error_message.clone(),
            timestamp: Utc::now(),
        });
        info!(
            task_id = task.id,
            source_id = %outcome.result.source_id,
            status = outcome.result.status.as_str(),
            detections = outcome.result.detections_found,
            duration_ms = outcome.result.duration_ms,
            "Source finished"
        );
        Ok(())
    }

    /// Give every source from `from` onward a `skipped` result
    async fn record_skipped(&self, task: &ScanTask, from: usize, reason: &str) -> ScanResult<()> {
        for (position, source) in task.sources.iter().enumerate().skip(from) {
            let result = SourceResult::skipped(&source.id, &source.name, reason);
            retry_once("record_source_result", self.retry_delay(), || {
                self.store.record_source_result(task.id, position, &result)
            })
            .await?;
            self.events().publish(ScanEvent::SourceFinished {
                task_id: task.id,
                source_id: source.id.clone(),
                status: SourceStatus::Skipped,
                detections: 0,
                message: Some(reason.to_string()),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    async fn finish_cancelled(&self, task: &ScanTask, next_position: usize) -> ScanResult<ScanStatus> {
        self.record_skipped(task, next_position, "scan cancelled").await?;
        retry_once("finish_task", self.retry_delay(), || {
            self.store
                .finish_task(task.id, ScanStatus::Cancelled, None, Some("cancelled by request"))
        })
        .await?;

        let current = self.store.load_task(task.id).await.ok().flatten();
        let scanned_count = current.as_ref().map(|t| t.scanned_count).unwrap_or_default();
        info!(task_id = task.id, scanned_count, "Scan cancelled");
        self.events().publish(ScanEvent::ScanCancelled {
            task_id: task.id,
            scanned_count,
            timestamp: Utc::now(),
        });
        self.notify_summary(task, ScanStatus::Cancelled, scanned_count, None).await;
        Ok(ScanStatus::Cancelled)
    }

    async fn finish_completed(&self, task: &ScanTask) -> ScanResult<ScanStatus> {
        let total_detections =
            retry_once("total_detections", self.retry_delay(), || self.store.total_detections(task.id)).await?;
        let results =
            retry_once("source_results", self.retry_delay(), || self.store.source_results(task.id)).await?;

        let mut snapshot = self
            .store
            .load_task(task.id)
            .await?
            .unwrap_or_else(|| task.clone());
        if let Err(e) = snapshot.transition_to(ScanStatus::Completed) {
            warn!(task_id = task.id, error = %e, "Aggregate report keeps the stored status");
        }

        let aggregate = match self.reporter.aggregate_report(&snapshot, &results, total_detections).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                let e = ScanError::Reporting(e.to_string());
                warn!(task_id = task.id, error = %e, "Aggregate report not written");
                None
            }
        };

        retry_once("finish_task", self.retry_delay(), || {
            self.store
                .finish_task(task.id, ScanStatus::Completed, aggregate.as_deref(), None)
        })
        .await?;

        info!(
            task_id = task.id,
            total_detections,
            sources = results.len(),
            "Scan completed"
        );
        self.events().publish(ScanEvent::ScanCompleted {
            task_id: task.id,
            total_detections,
            timestamp: Utc::now(),
        });
        self.notify_summary(task, ScanStatus::Completed, snapshot.scanned_count, aggregate)
            .await;
        Ok(ScanStatus::Completed)
    }

    /// Mark the task failed after a fatal error; returns the error
    async fn fail_task(&self, task_id: i64, error: ScanError) -> ScanError {
        error!(task_id, error = %error, "Scan failed");
        let message = error.to_string();
        *self.last_error.write().await = Some(format!("task {}: {}", task_id, message));
        if let Err(e) = retry_once("finish_task", self.retry_delay(), || {
            self.store
                .finish_task(task_id, ScanStatus::Failed, None, Some(message.as_str()))
        })
        .await
        {
            error!(task_id, error = %e, "Could not record scan failure");
        }
        self.events().publish(ScanEvent::ScanFailed {
            task_id,
            error: message,
            timestamp: Utc::now(),
        });
        error
    }

    async fn notify_match(&self, task: &ScanTask, source: &SourceSpec, first: &MatchEvent, match_count: usize) {
        let notification = Notification::MatchAlert {
            task_id: task.id,
            case_id: task.case_id.clone(),
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            location: source.location.clone(),
            frame_index: first.frame_index,
            track_id: first.track_id,
            fused_score: first.fused_score,
            snapshot: first.saved_crop_reference.clone(),
            match_count,
        };
        self.deliver(task.id, &notification).await;
    }

    async fn notify_summary(
        &self,
        task: &ScanTask,
        status: ScanStatus,
        scanned_count: u32,
        aggregate_report: Option<String>,
    ) {
        let total_detections = self.store.total_detections(task.id).await.unwrap_or_default();
        let notification = Notification::ScanSummary {
            task_id: task.id,
            case_id: task.case_id.clone(),
            status,
            scanned_count,
            total_count: task.total_count,
            total_detections,
            aggregate_report,
        };
        self.deliver(task.id, &notification).await;
    }

    async fn deliver(&self, task_id: i64, notification: &Notification) {
        if !self.notifier.notify(notification).await {
            let e = ScanError::Notification("notifier reported non-delivery".to_string());
            warn!(task_id, error = %e, "Notification not delivered");
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
