//! Target profile enrollment from reference media

use image::{GrayImage, RgbImage};
use std::sync::Arc;
use tracing::{info, warn};

use super::silhouette::silhouette_from_crop;
use crate::capabilities::{FaceEmbedder, FrameReader, GaitEmbedder};
use crate::error::{ScanError, ScanResult};
use crate::models::TargetProfile;

/// Builds a [`TargetProfile`] from a reference face image and/or a walking clip
pub struct TargetEnroller {
    strict_face: Option<Arc<dyn FaceEmbedder>>,
    lenient_face: Option<Arc<dyn FaceEmbedder>>,
    gait: Option<Arc<dyn GaitEmbedder>>,
    /// Frames read from a walking clip at most
    max_clip_frames: usize,
}

impl TargetEnroller {
    pub fn new(
        strict_face: Option<Arc<dyn FaceEmbedder>>,
        lenient_face: Option<Arc<dyn FaceEmbedder>>,
        gait: Option<Arc<dyn GaitEmbedder>>,
    ) -> Self {
        Self {
            strict_face,
            lenient_face,
            gait,
            max_clip_frames: 512,
        }
    }

    /// Strict face pass first, lenient pass only if the strict one finds nothing
    pub fn face_embedding(&self, image: &RgbImage) -> Option<Vec<f32>> {
        for (pass, embedder) in [("strict", &self.strict_face), ("lenient", &self.lenient_face)] {
            let Some(embedder) = embedder else { continue };
            match embedder.embed(image) {
                Ok(Some(v)) if !v.is_empty() => {
                    info!(pass, backend = embedder.name(), "Reference face embedded");
                    return Some(v);
                }
                Ok(_) => warn!(pass, "No face found in reference image"),
                Err(e) => warn!(pass, error = %e, "Reference face embedding failed"),
            }
        }
        None
    }

    /// Silhouettes of every clip frame, then one gait embedding
    pub fn gait_embedding(&self, clip: &mut dyn FrameReader) -> Option<Vec<f32>> {
        let embedder = self.gait.as_ref()?;

        let mut silhouettes: Vec<GrayImage> = Vec::new();
        while silhouettes.len() < self.max_clip_frames {
            match clip.next_frame() {
                Ok(Some(frame)) => silhouettes.push(silhouette_from_crop(&frame)),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Walking clip frame unreadable, stopping");
                    break;
                }
            }
        }
        if silhouettes.is_empty() {
            warn!("Walking clip yielded no frames");
            return None;
        }

        match embedder.embed(&silhouettes) {
            Ok(Some(v)) if !v.is_empty() => Some(v),
            Ok(_) => {
                warn!(frames = silhouettes.len(), "Gait embedding not computed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Gait embedding failed");
                None
            }
        }
    }

    /// Enroll a target; `TargetProfileMissing` when neither input yields a vector
    pub fn enroll(
        &self,
        name: &str,
        face_image: Option<&RgbImage>,
        walking_clip: Option<&mut dyn FrameReader>,
    ) -> ScanResult<TargetProfile> {
        let face = face_image.and_then(|image| self.face_embedding(image));
        let gait = walking_clip.and_then(|clip| self.gait_embedding(clip));

        if face.is_none() && gait.is_none() {
            return Err(ScanError::TargetProfileMissing(format!(
                "no face or gait embedding could be extracted for '{}'",
                name
            )));
        }
        TargetProfile::new(name, face, gait)
    }
}
