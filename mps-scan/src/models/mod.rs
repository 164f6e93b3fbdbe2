//! Data models for mps-scan

pub mod bbox;
pub mod match_event;
pub mod scan_task;
pub mod source_result;
pub mod target_profile;

pub use bbox::BBox;
pub use match_event::{AuditRecord, MatchEvent};
pub use mps_common::events::SourceStatus;
pub use scan_task::{progress_percent, ScanStatus, ScanTask, SourceSpec};
pub use source_result::SourceResult;
pub use target_profile::TargetProfile;
