//! Face embedding with a layered fallback chain

use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Single face embedding backend
pub trait FaceEmbedder: Send + Sync {
    /// Backend name reported with each embedding
    fn name(&self) -> &str;

    /// `Ok(None)` when no face is found; `Err` on backend failure
    fn embed(&self, image: &RgbImage) -> anyhow::Result<Option<Vec<f32>>>;
}

/// Face embedding plus the backend that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding {
    pub vector: Vec<f32>,
    pub backend: String,
}

/// Tries backends in order (fast/lenient, accurate, maximally lenient); the
/// first non-empty result wins
///
/// Backend errors are treated as missing evidence. Per-backend hit counts are
/// kept for diagnostics.
pub struct FallbackFaceEmbedder {
    backends: Vec<Arc<dyn FaceEmbedder>>,
    hits: Vec<AtomicU64>,
    misses: AtomicU64,
}

impl FallbackFaceEmbedder {
    pub fn new(backends: Vec<Arc<dyn FaceEmbedder>>) -> Self {
        let hits = backends.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            backends,
            hits,
            misses: AtomicU64::new(0),
        }
    }

    /// A chain with no backends; every lookup misses
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_enabled(&self) -> bool {
        !self.backends.is_empty()
    }

    pub fn embed(&self, image: &RgbImage) -> Option<FaceEmbedding> {
        for (backend, hits) in self.backends.iter().zip(&self.hits) {
            match backend.embed(image) {
                Ok(Some(vector)) if !vector.is_empty() => {
                    hits.fetch_add(1, Ordering::Relaxed);
                    return Some(FaceEmbedding {
                        vector,
                        backend: backend.name().to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Face backend failed, trying next");
                }
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// `(backend, hits)` per backend plus the number of total misses
    pub fn stats(&self) -> (Vec<(String, u64)>, u64) {
        let per_backend = self
            .backends
            .iter()
            .zip(&self.hits)
            .map(|(b, h)| (b.name().to_string(), h.load(Ordering::Relaxed)))
            .collect();
        (per_backend, self.misses.load(Ordering::Relaxed))
    }
}
