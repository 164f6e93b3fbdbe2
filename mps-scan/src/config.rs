//! Service configuration for mps-scan
//!
//! Loaded from `~/.config/mps/mps-scan.toml` (or `--config`). Every field has
//! a built-in default so a missing file or section runs with stock values.

use mps_common::config::LoggingConfig;
use mps_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5731;

/// Top-level TOML document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanServiceConfig {
    /// Root folder override (CLI and `MPS_ROOT_FOLDER` take precedence)
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub matching: MatchingConfig,
    pub scan: ScanConfig,
    pub storage: StorageConfig,
    pub notify: NotifyConfig,
}

impl ScanServiceConfig {
    pub fn validate(&self) -> Result<()> {
        self.matching.validate()?;
        self.scan.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Thresholds, caps and weights for the matching engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Face cosine similarity that alone decides a match
    pub face_threshold: f64,
    /// Gait cosine similarity that alone decides a match
    pub gait_threshold: f64,
    /// Weighted face+gait score that decides a match
    pub fused_threshold: f64,
    pub w_face: f64,
    pub w_gait: f64,
    /// Silhouettes needed before a gait embedding is attempted
    pub min_silhouette_frames: usize,
    /// Max buffered face embeddings per track
    pub face_cap: usize,
    /// Max buffered silhouettes per track
    pub silhouette_cap: usize,
    /// Frames a track may go unseen before eviction
    pub stale_threshold: u64,
    /// Minimum detector confidence
    pub detect_conf: f32,
    /// IoU above which overlapping detections are suppressed
    pub iou: f32,
    /// Boxes covering at least this fraction of the frame are discarded
    pub max_box_area_ratio: f32,
    /// Process every Nth frame
    pub frame_stride: u64,
    /// Archive a detected-person crop every N frames per track (0 disables)
    pub detection_crop_interval: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            face_threshold: 0.55,
            gait_threshold: 0.70,
            fused_threshold: 0.55,
            w_face: 0.8,
            w_gait: 0.2,
            min_silhouette_frames: 16,
            face_cap: 8,
            silhouette_cap: 64,
            stale_threshold: 300,
            detect_conf: 0.25,
            iou: 0.45,
            max_box_area_ratio: 0.95,
            frame_stride: 1,
            detection_crop_interval: 30,
        }
    }
}

impl MatchingConfig {
    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("face_threshold", self.face_threshold),
            ("gait_threshold", self.gait_threshold),
            ("fused_threshold", self.fused_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "matching.{} must be within [-1, 1], got {}",
                    name, value
                )));
            }
        }

        if self.w_face < 0.0 || self.w_gait < 0.0 || self.w_face + self.w_gait <= 0.0 {
            return Err(Error::Config(format!(
                "matching weights must be non-negative with a positive sum, got {} / {}",
                self.w_face, self.w_gait
            )));
        }

        if self.face_cap == 0 || self.silhouette_cap == 0 || self.min_silhouette_frames == 0 {
            return Err(Error::Config(
                "matching.face_cap, silhouette_cap and min_silhouette_frames must be positive"
                    .to_string(),
            ));
        }

        if self.min_silhouette_frames > self.silhouette_cap {
            return Err(Error::Config(format!(
                "matching.min_silhouette_frames ({}) exceeds silhouette_cap ({})",
                self.min_silhouette_frames, self.silhouette_cap
            )));
        }

        if !(0.0..=1.0).contains(&self.detect_conf)
            || !(0.0..=1.0).contains(&self.iou)
            || !(0.0..=1.0).contains(&self.max_box_area_ratio)
        {
            return Err(Error::Config(
                "matching.detect_conf, iou and max_box_area_ratio must be within [0, 1]".to_string(),
            ));
        }

        if self.frame_stride == 0 {
            return Err(Error::Config("matching.frame_stride must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Orchestration limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Tasks allowed to process sources at the same time
    pub max_concurrent_scans: usize,
    /// Wall-clock limit for one source
    pub source_timeout_secs: u64,
    /// Event bus capacity per subscriber
    pub event_channel_capacity: usize,
    /// Delay before the single persistence retry
    pub persistence_retry_delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: 2,
            source_timeout_secs: 1800,
            event_channel_capacity: 256,
            persistence_retry_delay_ms: 200,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_scans == 0 {
            return Err(Error::Config("scan.max_concurrent_scans must be at least 1".to_string()));
        }
        if self.source_timeout_secs == 0 {
            return Err(Error::Config("scan.source_timeout_secs must be at least 1".to_string()));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Config("scan.event_channel_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Artifact directories, relative to the root folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub reports_dir: String,
    pub snapshots_dir: String,
    pub detections_dir: String,
    pub audit_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: "reports".to_string(),
            snapshots_dir: "matches".to_string(),
            detections_dir: "detections".to_string(),
            audit_dir: "audit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving JSON notifications; unset logs them instead
    pub webhook_url: Option<String>,
    /// Request timeout for webhook delivery
    pub timeout_secs: Option<u64>,
}
