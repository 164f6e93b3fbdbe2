//! Match events and audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BBox;

/// A track/frame pair whose fused verdict was a match
///
/// Append-only: once recorded it is never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub source_id: String,
    pub frame_index: u64,
    pub track_id: i64,
    pub bbox: BBox,
    pub face_similarity: Option<f64>,
    pub gait_similarity: Option<f64>,
    pub fused_score: Option<f64>,
    pub matched: bool,
    /// Annotated frame snapshot, if one could be written
    pub saved_crop_reference: Option<String>,
    /// Face backend that produced the track's latest embedding
    pub face_backend: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One line of the per-task audit log
///
/// Written for every evaluated track/frame pair, matched or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub frame_index: u64,
    pub track_id: i64,
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub face_similarity: Option<f64>,
    pub gait_similarity: Option<f64>,
    pub fused_score: Option<f64>,
    pub matched: bool,
    /// Empty when nothing was saved
    pub saved_crop_reference: String,
}
