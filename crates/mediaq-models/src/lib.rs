//! Shared data models for the MediaQ derivative pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity, kind and lifecycle state
//! - Poster, sprite and optimize job payloads (with validation)
//! - Derivative results recorded on completed jobs

pub mod error;
pub mod job;
pub mod payload;
pub mod result;

// Re-export common types
pub use error::{ValidationError, ValidationResult};
pub use job::{JobId, JobKind, JobState, RetryPolicy};
pub use payload::{
    ImageFormat, JobPayload, OptimizeJob, PosterJob, SpriteImage, SpriteJob, DEFAULT_GRID_SIZE,
    DEFAULT_OPTIMIZE_FORMAT, DEFAULT_OPTIMIZE_QUALITY, DEFAULT_POSTER_SIZES, DEFAULT_THUMB_HEIGHT,
    DEFAULT_THUMB_WIDTH, MAX_SHEET_DIMENSION, SUPPORTED_FORMATS,
};
pub use result::{object_url, OptimizedImage, PosterVariant, SpriteSheet};
