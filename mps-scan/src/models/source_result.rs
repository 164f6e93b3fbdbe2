//! Per-source outcome within a scan task

use serde::{Deserialize, Serialize};

use super::SourceStatus;

/// Outcome record for one source of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source_id: String,
    pub source_name: String,
    pub status: SourceStatus,
    pub detections_found: u32,
    pub frames_processed: u64,
    pub duration_ms: u64,
    pub report_reference: Option<String>,
    pub error_message: Option<String>,
}

impl SourceResult {
    pub fn ok(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        detections_found: u32,
        frames_processed: u64,
        duration_ms: u64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_name: source_name.into(),
            status: SourceStatus::Ok,
            detections_found,
            frames_processed,
            duration_ms,
            report_reference: None,
            error_message: None,
        }
    }

    pub fn unavailable(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::without_detections(source_id, source_name, SourceStatus::Unavailable, message, 0)
    }

    pub fn error(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self::without_detections(source_id, source_name, SourceStatus::Error, message, duration_ms)
    }

    pub fn skipped(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::without_detections(source_id, source_name, SourceStatus::Skipped, message, 0)
    }

    fn without_detections(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        status: SourceStatus,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_name: source_name.into(),
            status,
            detections_found: 0,
            frames_processed: 0,
            duration_ms,
            report_reference: None,
            error_message: Some(message.into()),
        }
    }

    pub fn with_report(mut self, reference: Option<String>) -> Self {
        self.report_reference = reference;
        self
    }
}
