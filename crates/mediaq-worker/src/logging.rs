//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mediaq_models::JobId;

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; anything else gives ANSI text.
/// `RUST_LOG` replaces the default filter when set.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "warn,mediaq_worker=info,mediaq_queue=info,mediaq_storage=info,mediaq_media=info",
        )
    });

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
///
/// Every event carries the job id and the queue it came from.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    queue: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, queue: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            queue: queue.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            queue = %self.queue,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            queue = %self.queue,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Span wrapping everything a handler does for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            queue = %self.queue
        )
    }
}
