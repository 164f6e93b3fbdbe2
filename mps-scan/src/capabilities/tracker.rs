//! Greedy IoU tracker
//!
//! Associates detections with live tracks by box overlap. A track is
//! confirmed after `min_hits` associations and dropped after `max_age`
//! frames without one.

use image::RgbImage;

use super::{Detection, Tracker, TrackedObject};
use crate::models::BBox;

#[derive(Debug, Clone, Copy)]
pub struct IouTrackerConfig {
    pub iou_threshold: f32,
    pub min_hits: u32,
    pub max_age: u32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            min_hits: 3,
            max_age: 30,
        }
    }
}

#[derive(Debug, Clone)]
struct LiveTrack {
    id: i64,
    bbox: BBox,
    hits: u32,
    misses: u32,
}

#[derive(Debug)]
pub struct IouTracker {
    config: IouTrackerConfig,
    tracks: Vec<LiveTrack>,
    next_id: i64,
}

impl IouTracker {
    pub fn new(config: IouTrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[Detection], _frame: &RgbImage) -> Vec<TrackedObject> {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.iou_threshold {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        for (_, ti, di) in pairs {
            if track_used[ti] || det_used[di] {
                continue;
            }
            track_used[ti] = true;
            det_used[di] = true;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.hits += 1;
            track.misses = 0;
        }

        for (ti, used) in track_used.iter().enumerate() {
            if !used {
                self.tracks[ti].misses += 1;
            }
        }
        let max_age = self.config.max_age;
        self.tracks.retain(|t| t.misses <= max_age);

        for (di, det) in detections.iter().enumerate() {
            if !det_used[di] {
                self.tracks.push(LiveTrack {
                    id: self.next_id,
                    bbox: det.bbox,
                    hits: 1,
                    misses: 0,
                });
                self.next_id += 1;
            }
        }

        self.tracks
            .iter()
            .filter(|t| t.misses == 0)
            .map(|t| TrackedObject {
                track_id: t.id,
                bbox: t.bbox,
                confirmed: t.hits >= self.config.min_hits,
            })
            .collect()
    }
}
