//! Detector output filtering

use crate::capabilities::{Detection, PERSON_CLASS};
use crate::config::MatchingConfig;

/// Keep confident person boxes that fit inside the frame, then suppress overlaps
///
/// Boxes are clamped to the frame. Boxes covering at least
/// `max_box_area_ratio` of the frame are dropped as detector artefacts.
pub fn filter_person_detections(
    detections: &[Detection],
    frame_width: u32,
    frame_height: u32,
    config: &MatchingConfig,
) -> Vec<Detection> {
    let frame_area = frame_width as f32 * frame_height as f32;
    if frame_area <= 0.0 {
        return Vec::new();
    }

    let mut kept: Vec<Detection> = detections
        .iter()
        .filter(|d| d.class_id == PERSON_CLASS && d.confidence >= config.detect_conf)
        .map(|d| Detection {
            bbox: d.bbox.clamp_to(frame_width, frame_height),
            ..*d
        })
        .filter(|d| {
            let area = d.bbox.area();
            area > 0.0 && area / frame_area < config.max_box_area_ratio
        })
        .collect();

    non_max_suppression(&mut kept, config.iou);
    kept
}

/// Greedy NMS, highest confidence first
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..detections.len() {
        let overlaps = (0..current_index)
            .any(|prev| detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold);
        if !overlaps {
            detections.swap(current_index, index);
            current_index += 1;
        }
    }
    detections.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> Detection {
        Detection {
            bbox: BBox::new(x1, y1, x2, y2),
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_class_and_confidence_filter() {
        let config = MatchingConfig::default();
        let out = filter_person_detections(
            &[
                det(10.0, 10.0, 50.0, 90.0, 0.9, PERSON_CLASS),
                det(100.0, 10.0, 140.0, 90.0, 0.9, 2),
                det(200.0, 10.0, 240.0, 90.0, 0.2, PERSON_CLASS),
                det(300.0, 10.0, 340.0, 90.0, 0.25, PERSON_CLASS),
            ],
            640,
            480,
            &config,
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|d| d.class_id == PERSON_CLASS));
    }

    #[test]
    fn test_full_frame_boxes_discarded() {
        let config = MatchingConfig::default();
        let out = filter_person_detections(
            &[det(-10.0, -10.0, 700.0, 500.0, 0.99, PERSON_CLASS)],
            640,
            480,
            &config,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_overlaps_suppressed_keeping_most_confident() {
        let config = MatchingConfig::default();
        let out = filter_person_detections(
            &[
                det(10.0, 10.0, 60.0, 110.0, 0.6, PERSON_CLASS),
                det(12.0, 12.0, 62.0, 112.0, 0.8, PERSON_CLASS),
                det(300.0, 10.0, 350.0, 110.0, 0.7, PERSON_CLASS),
            ],
            640,
            480,
            &config,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.8);
        assert_eq!(out[1].confidence, 0.7);
    }
}
