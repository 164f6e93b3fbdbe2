//! Per-track bounded signal history
//!
//! Owned by exactly one pipeline run. Nothing here touches persistence.

use image::GrayImage;
use std::collections::{HashMap, VecDeque};

use crate::config::MatchingConfig;
use crate::error::{ScanError, ScanResult};
use crate::models::BBox;

/// Tracker identity with its buffered evidence
#[derive(Debug, Clone)]
pub struct Track {
    pub id: i64,
    pub bbox: BBox,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    /// `(frame_index, embedding)`, oldest first
    pub faces: VecDeque<(u64, Vec<f32>)>,
    /// Oldest first
    pub silhouettes: VecDeque<GrayImage>,
    /// Face backend that produced the newest embedding
    pub face_backend: Option<String>,
}

impl Track {
    fn new(id: i64, bbox: BBox, frame_index: u64) -> Self {
        Self {
            id,
            bbox,
            first_seen_frame: frame_index,
            last_seen_frame: frame_index,
            faces: VecDeque::new(),
            silhouettes: VecDeque::new(),
            face_backend: None,
        }
    }

    /// Most recently buffered face embedding
    pub fn latest_face(&self) -> Option<&[f32]> {
        self.faces.back().map(|(_, v)| v.as_slice())
    }

    /// The newest `n` silhouettes in temporal order, or `None` if fewer exist
    pub fn recent_silhouettes(&self, n: usize) -> Option<Vec<GrayImage>> {
        if n == 0 || self.silhouettes.len() < n {
            return None;
        }
        Some(self.silhouettes.iter().skip(self.silhouettes.len() - n).cloned().collect())
    }
}

pub struct TrackBufferManager {
    tracks: HashMap<i64, Track>,
    face_cap: usize,
    silhouette_cap: usize,
    stale_threshold: u64,
}

impl TrackBufferManager {
    pub fn new(face_cap: usize, silhouette_cap: usize, stale_threshold: u64) -> Self {
        Self {
            tracks: HashMap::new(),
            face_cap,
            silhouette_cap,
            stale_threshold,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(config.face_cap, config.silhouette_cap, config.stale_threshold)
    }

    /// Create the track or refresh its box and last-seen frame
    pub fn upsert(&mut self, track_id: i64, bbox: BBox, frame_index: u64) -> &Track {
        let track = self
            .tracks
            .entry(track_id)
            .or_insert_with(|| Track::new(track_id, bbox, frame_index));
        track.bbox = bbox;
        track.last_seen_frame = track.last_seen_frame.max(frame_index);
        track
    }

    /// Buffer a face embedding at the track's last-seen frame
    pub fn append_face_embedding(&mut self, track_id: i64, vector: Vec<f32>) -> ScanResult<()> {
        let cap = self.face_cap;
        let track = self
            .tracks
            .get_mut(&track_id)
            .ok_or(ScanError::UnknownTrack(track_id))?;
        let frame_index = track.last_seen_frame;
        push_bounded(&mut track.faces, (frame_index, vector), cap);
        Ok(())
    }

    pub fn set_face_backend(&mut self, track_id: i64, backend: String) {
        if let Some(track) = self.tracks.get_mut(&track_id) {
            track.face_backend = Some(backend);
        }
    }

    pub fn append_silhouette(&mut self, track_id: i64, mask: GrayImage) -> ScanResult<()> {
        let cap = self.silhouette_cap;
        let track = self
            .tracks
            .get_mut(&track_id)
            .ok_or(ScanError::UnknownTrack(track_id))?;
        push_bounded(&mut track.silhouettes, mask, cap);
        Ok(())
    }

    /// Drop tracks unseen for more than `stale_threshold` frames; returns their ids
    pub fn evict_stale(&mut self, current_frame_index: u64) -> Vec<i64> {
        let threshold = self.stale_threshold;
        let mut evicted: Vec<i64> = self
            .tracks
            .values()
            .filter(|t| current_frame_index.saturating_sub(t.last_seen_frame) > threshold)
            .map(|t| t.id)
            .collect();
        evicted.sort_unstable();
        for id in &evicted {
            self.tracks.remove(id);
        }
        evicted
    }

    pub fn get(&self, track_id: i64) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, cap: usize) {
    while buffer.len() >= cap {
        buffer.pop_front();
    }
    buffer.push_back(item);
}
