//! Derivative generation worker.
//!
//! This crate provides:
//! - Poster, sprite and optimize job handlers
//! - One bounded-concurrency worker per queue with retry hand-off
//! - Progress reporting
//! - Graceful shutdown that drains in-flight jobs

pub mod config;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod retry;

pub use config::{PosterSettings, SpriteSettings, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{QueueWorker, WorkerRuntime, WorkerSettings};
pub use handlers::{JobHandler, OptimizeHandler, PosterHandler, SpriteHandler};
pub use logging::JobLogger;
pub use progress::ProgressReporter;
