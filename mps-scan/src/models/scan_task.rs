//! Scan task state machine
//!
//! A task moves `pending → in_progress → {completed, failed, cancelled}`.
//! `pending` may also fail or be cancelled directly. Terminal states absorb
//! every later update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::InProgress => "in_progress",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "in_progress" => Some(ScanStatus::InProgress),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            "cancelled" => Some(ScanStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::InProgress => 1,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled => 2,
        }
    }

    /// Whether `next` is a legal forward step from `self`
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ScanStatus::Completed => *self == ScanStatus::InProgress,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One camera source in a task's list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    pub name: String,
    /// Frame directory, video file or stream URL
    pub path: String,
    /// Free-form location metadata forwarded with match notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Progress percentage with 0 sources reported as 0
pub fn progress_percent(scanned_count: u32, total_count: u32) -> f64 {
    if total_count == 0 {
        return 0.0;
    }
    scanned_count as f64 * 100.0 / total_count as f64
}

/// One orchestrated run across an ordered source list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTask {
    pub id: i64,
    pub case_id: String,
    pub profile_id: i64,
    pub sources: Vec<SourceSpec>,
    pub status: ScanStatus,
    pub scanned_count: u32,
    pub total_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub aggregate_report: Option<String>,
    pub error_message: Option<String>,
}

impl ScanTask {
    /// New `pending` task; `id` is assigned by the store
    pub fn new(case_id: impl Into<String>, profile_id: i64, sources: Vec<SourceSpec>) -> Self {
        let total_count = sources.len() as u32;
        Self {
            id: 0,
            case_id: case_id.into(),
            profile_id,
            sources,
            status: ScanStatus::Pending,
            scanned_count: 0,
            total_count,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            aggregate_report: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn progress_percent(&self) -> f64 {
        progress_percent(self.scanned_count, self.total_count)
    }

    /// Apply a status change
    ///
    /// Returns `Ok(false)` when the task is already terminal or already in
    /// `next`; such updates are silently ignored. A backward step is an error.
    pub fn transition_to(&mut self, next: ScanStatus) -> ScanResult<bool> {
        if self.is_terminal() || self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(ScanError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next == ScanStatus::InProgress {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(true)
    }

    /// Count one more finished source, capped at `total_count`
    pub fn record_scanned(&mut self) -> bool {
        if self.is_terminal() || self.scanned_count >= self.total_count {
            return false;
        }
        self.scanned_count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(n: usize) -> Vec<SourceSpec> {
        (0..n)
            .map(|i| SourceSpec {
                id: format!("cam-{}", i),
                name: format!("Camera {}", i),
                path: format!("/footage/{}", i),
                location: None,
            })
            .collect()
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = ScanTask::new("case-1", 1, sources(3));
        assert_eq!(task.status, ScanStatus::Pending);
        assert_eq!(task.total_count, 3);
        assert_eq!(task.scanned_count, 0);
    }

    #[test]
    fn test_progress_two_of_five_is_exactly_forty() {
        assert_eq!(progress_percent(2, 5), 40.0);
        assert_eq!(progress_percent(0, 0), 0.0);
        assert_eq!(progress_percent(3, 3), 100.0);
    }

    #[test]
    fn test_forward_transitions() {
        let mut task = ScanTask::new("case-1", 1, sources(1));
        assert!(task.transition_to(ScanStatus::InProgress).unwrap());
        assert!(task.started_at.is_some());
        assert!(task.transition_to(ScanStatus::Completed).unwrap());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut task = ScanTask::new("case-1", 1, sources(1));
        assert!(matches!(
            task.transition_to(ScanStatus::Completed),
            Err(ScanError::InvalidTransition { .. })
        ));
        assert!(task.transition_to(ScanStatus::Failed).unwrap());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut task = ScanTask::new("case-1", 1, sources(1));
        task.transition_to(ScanStatus::InProgress).unwrap();
        assert!(task.transition_to(ScanStatus::Pending).is_err());
        assert_eq!(task.status, ScanStatus::InProgress);
    }

    #[test]
    fn test_terminal_updates_are_noops() {
        for terminal in [ScanStatus::Completed, ScanStatus::Failed, ScanStatus::Cancelled] {
            let mut task = ScanTask::new("case-1", 1, sources(2));
            task.transition_to(ScanStatus::InProgress).unwrap();
            task.record_scanned();
            task.transition_to(terminal).unwrap();
            let snapshot = task.clone();

            assert!(!task.transition_to(ScanStatus::InProgress).unwrap());
            assert!(!task.transition_to(ScanStatus::Failed).unwrap());
            assert!(!task.record_scanned());
            assert_eq!(task, snapshot);
        }
    }

    #[test]
    fn test_scanned_count_never_exceeds_total() {
        let mut task = ScanTask::new("case-1", 1, sources(2));
        task.transition_to(ScanStatus::InProgress).unwrap();
        assert!(task.record_scanned());
        assert!(task.record_scanned());
        assert!(!task.record_scanned());
        assert_eq!(task.scanned_count, 2);
    }
}
