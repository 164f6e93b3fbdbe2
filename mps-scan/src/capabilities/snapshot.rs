//! Match snapshots and detection crop archive

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::PathBuf;

use crate::models::BBox;

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Persists images referenced from match events
pub trait SnapshotStore: Send + Sync {
    /// Save the full frame with the matched box drawn; returns a reference
    fn save_match(
        &self,
        task_id: i64,
        source_id: &str,
        frame_index: u64,
        track_id: i64,
        frame: &RgbImage,
        bbox: &BBox,
    ) -> anyhow::Result<String>;

    /// Archive a detected-person crop
    fn save_detection(
        &self,
        task_id: i64,
        source_id: &str,
        frame_index: u64,
        track_id: i64,
        crop: &RgbImage,
    ) -> anyhow::Result<String>;
}

/// Writes JPEG files under two directories
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    matches_dir: PathBuf,
    detections_dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(matches_dir: PathBuf, detections_dir: PathBuf) -> Self {
        Self {
            matches_dir,
            detections_dir,
        }
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn save_match(
        &self,
        task_id: i64,
        source_id: &str,
        frame_index: u64,
        track_id: i64,
        frame: &RgbImage,
        bbox: &BBox,
    ) -> anyhow::Result<String> {
        let dir = self.matches_dir.join(format!("task_{}", task_id));
        std::fs::create_dir_all(&dir)?;

        let annotated = annotate(frame, bbox);
        let path = dir.join(format!(
            "{}_frame{}_track{}.jpg",
            sanitize(source_id),
            frame_index,
            track_id
        ));
        annotated.save(&path)?;
        Ok(path.display().to_string())
    }

    fn save_detection(
        &self,
        task_id: i64,
        source_id: &str,
        frame_index: u64,
        track_id: i64,
        crop: &RgbImage,
    ) -> anyhow::Result<String> {
        let dir = self.detections_dir.join(format!("task_{}", task_id));
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!(
            "{}_frame{}_track{}.jpg",
            sanitize(source_id),
            frame_index,
            track_id
        ));
        crop.save(&path)?;
        Ok(path.display().to_string())
    }
}

/// Copy of `frame` with a two pixel box around `bbox`
pub fn annotate(frame: &RgbImage, bbox: &BBox) -> RgbImage {
    let mut out = frame.clone();
    let clamped = bbox.clamp_to(frame.width(), frame.height());
    if let Some((x, y, w, h)) = clamped.to_pixel_rect() {
        draw_hollow_rect_mut(&mut out, Rect::at(x as i32, y as i32).of_size(w, h), MATCH_COLOR);
        if w > 2 && h > 2 {
            let inner = Rect::at(x as i32 + 1, y as i32 + 1).of_size(w - 2, h - 2);
            draw_hollow_rect_mut(&mut out, inner, MATCH_COLOR);
        }
    }
    out
}

fn sanitize(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_annotate_draws_box_edges() {
        let frame = RgbImage::new(20, 20);
        let out = annotate(&frame, &BBox::new(5.0, 5.0, 15.0, 15.0));
        assert_eq!(*out.get_pixel(5, 5), MATCH_COLOR);
        assert_eq!(*out.get_pixel(10, 5), MATCH_COLOR);
        assert_eq!(*out.get_pixel(10, 10), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_match_writes_jpeg() {
        let dir = TempDir::new().unwrap();
        let store = FsSnapshotStore::new(dir.path().join("matches"), dir.path().join("detections"));
        let frame = RgbImage::from_pixel(32, 24, Rgb([90, 90, 90]));

        let reference = store
            .save_match(7, "north/gate", 12, 3, &frame, &BBox::new(2.0, 2.0, 20.0, 20.0))
            .unwrap();
        assert!(reference.ends_with("north_gate_frame12_track3.jpg"));
        assert!(std::path::Path::new(&reference).exists());
    }
}
