//! Multi-modal track matching engine
//!
//! One [`SourcePipeline`] drives one source frame by frame:
//! detect → track → buffer signals → fuse → decide.

pub mod detection;
pub mod enrollment;
pub mod fusion;
pub mod pipeline;
pub mod silhouette;
pub mod track_buffer;

pub use fusion::{cosine_similarity, FusionEngine, FusionVerdict, Modality};
pub use pipeline::{PipelineState, SourcePipeline, SourceRunSummary};
pub use track_buffer::{Track, TrackBufferManager};
