//! Axis-aligned bounding boxes in pixel coordinates

use serde::{Deserialize, Serialize};

/// Box given by its top-left `(x1, y1)` and bottom-right `(x2, y2)` corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let union = self.area() + other.area() - self.intersection_area(other);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / union
    }

    /// Clamp to `[0, width-1] x [0, height-1]`
    pub fn clamp_to(&self, width: u32, height: u32) -> BBox {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        BBox {
            x1: self.x1.clamp(0.0, max_x),
            y1: self.y1.clamp(0.0, max_y),
            x2: self.x2.clamp(0.0, max_x),
            y2: self.y2.clamp(0.0, max_y),
        }
    }

    /// Integer pixel rectangle `(x, y, w, h)`, `None` when empty
    pub fn to_pixel_rect(&self) -> Option<(u32, u32, u32, u32)> {
        let x = self.x1.max(0.0).floor() as u32;
        let y = self.y1.max(0.0).floor() as u32;
        let x2 = self.x2.max(0.0).ceil() as u32;
        let y2 = self.y2.max(0.0).ceil() as u32;
        if x2 <= x || y2 <= y {
            return None;
        }
        Some((x, y, x2 - x, y2 - y))
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}
