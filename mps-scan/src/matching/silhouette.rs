//! Person crops and silhouette masks

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;

use crate::models::BBox;

/// Crop `bbox` out of `frame`, `None` when the clamped box is empty
pub fn crop_region(frame: &RgbImage, bbox: &BBox) -> Option<RgbImage> {
    let clamped = bbox.clamp_to(frame.width(), frame.height());
    let (x, y, w, h) = clamped.to_pixel_rect()?;
    let w = w.min(frame.width().saturating_sub(x));
    let h = h.min(frame.height().saturating_sub(y));
    if w == 0 || h == 0 {
        return None;
    }
    Some(imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// Binary foreground mask: grayscale then Otsu threshold (255 above, 0 otherwise)
pub fn silhouette_from_crop(crop: &RgbImage) -> GrayImage {
    let gray = imageops::grayscale(crop);
    let level = otsu_level(&gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y).0[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_crop_is_clamped() {
        let frame = RgbImage::from_pixel(20, 10, Rgb([1, 2, 3]));
        let crop = crop_region(&frame, &BBox::new(15.0, 5.0, 40.0, 40.0)).unwrap();
        assert_eq!(crop.dimensions(), (4, 4));
        assert!(crop_region(&frame, &BBox::new(30.0, 30.0, 40.0, 40.0)).is_none());
    }

    #[test]
    fn test_silhouette_is_binary_and_separates_regions() {
        let crop = RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([20, 20, 20])
            } else {
                Rgb([230, 230, 230])
            }
        });
        let mask = silhouette_from_crop(&crop);
        assert_eq!(mask.dimensions(), (8, 8));
        assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(7, 7).0[0], 255);
    }
}
