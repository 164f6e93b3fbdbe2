//! Fusion decision engine
//!
//! Priority order: face alone, then gait alone, then the weighted face+gait
//! score. Pure apart from the gait embedder call, and deterministic.

use std::sync::Arc;
use tracing::debug;

use super::track_buffer::Track;
use crate::capabilities::GaitEmbedder;
use crate::config::MatchingConfig;
use crate::models::TargetProfile;

/// Sentinel for undefined similarity (zero magnitude or dimension mismatch)
pub const NO_SIMILARITY: f64 = -1.0;

/// Which signal produced a positive verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Face,
    Gait,
    Fused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionVerdict {
    pub face_similarity: Option<f64>,
    pub gait_similarity: Option<f64>,
    pub fused_score: Option<f64>,
    pub matched: bool,
    pub decided_by: Option<Modality>,
}

impl FusionVerdict {
    fn no_match(face_similarity: Option<f64>, gait_similarity: Option<f64>) -> Self {
        Self {
            face_similarity,
            gait_similarity,
            fused_score: None,
            matched: false,
            decided_by: None,
        }
    }
}

/// Cosine similarity in `[-1, 1]`, or [`NO_SIMILARITY`] when undefined
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return NO_SIMILARITY;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if !dot.is_finite() || !norm_a.is_finite() || !norm_b.is_finite() {
        return NO_SIMILARITY;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return NO_SIMILARITY;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Turn already computed similarities into a verdict
///
/// Non-finite similarities count as absent evidence.
pub fn decide(
    config: &MatchingConfig,
    face_similarity: Option<f64>,
    gait_similarity: Option<f64>,
) -> FusionVerdict {
    let face_similarity = face_similarity.filter(|s| s.is_finite());
    let gait_similarity = gait_similarity.filter(|s| s.is_finite());

    if let Some(face) = face_similarity {
        if face >= config.face_threshold {
            return FusionVerdict {
                face_similarity,
                gait_similarity,
                fused_score: Some(face),
                matched: true,
                decided_by: Some(Modality::Face),
            };
        }
    }

    if let Some(gait) = gait_similarity {
        if gait >= config.gait_threshold {
            return FusionVerdict {
                face_similarity,
                gait_similarity,
                fused_score: Some(gait),
                matched: true,
                decided_by: Some(Modality::Gait),
            };
        }
    }

    match (face_similarity, gait_similarity) {
        (Some(face), Some(gait)) => {
            let fused = (config.w_face * face + config.w_gait * gait).clamp(-1.0, 1.0);
            let matched = fused >= config.fused_threshold;
            FusionVerdict {
                face_similarity,
                gait_similarity,
                fused_score: Some(fused),
                matched,
                decided_by: matched.then_some(Modality::Fused),
            }
        }
        _ => FusionVerdict::no_match(face_similarity, gait_similarity),
    }
}

/// Evaluates buffered track evidence against one target
pub struct FusionEngine {
    config: Arc<MatchingConfig>,
    target: Arc<TargetProfile>,
    gait: Option<Arc<dyn GaitEmbedder>>,
}

impl FusionEngine {
    pub fn new(
        config: Arc<MatchingConfig>,
        target: Arc<TargetProfile>,
        gait: Option<Arc<dyn GaitEmbedder>>,
    ) -> Self {
        Self { config, target, gait }
    }

    pub fn evaluate(&self, track: &Track) -> FusionVerdict {
        let face_similarity = match (self.target.face(), track.latest_face()) {
            (Some(target), Some(observed)) => Some(cosine_similarity(target, observed)),
            _ => None,
        };

        if face_similarity.is_some_and(|s| s >= self.config.face_threshold) {
            return decide(&self.config, face_similarity, None);
        }

        let gait_similarity = self.gait_similarity(track);
        decide(&self.config, face_similarity, gait_similarity)
    }

    fn gait_similarity(&self, track: &Track) -> Option<f64> {
        let embedder = self.gait.as_ref()?;
        let target = self.target.gait()?;
        let window = track.recent_silhouettes(self.config.min_silhouette_frames)?;

        match embedder.embed(&window) {
            Ok(Some(observed)) => Some(cosine_similarity(target, &observed)),
            Ok(None) => None,
            Err(e) => {
                debug!(track_id = track.id, error = %e, "Gait embedding failed");
                None
            }
        }
    }
}
