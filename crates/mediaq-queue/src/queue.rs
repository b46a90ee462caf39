//! The job queue abstraction.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use mediaq_models::{JobId, JobPayload};

use crate::error::{QueueError, QueueResult};
use crate::job::{EnqueueOutcome, FailureOutcome, JobCounts, JobOptions, JobRecord};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix of every key the queue writes
    pub prefix: String,
    /// Completed records kept per queue
    pub keep_completed: usize,
    /// Failed records kept per queue
    pub keep_failed: usize,
    /// Lease of an active job; expired leases mark the job stalled
    pub lock_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "mediaq".to_string(),
            keep_completed: 200,
            keep_failed: 100,
            lock_ttl: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            prefix: std::env::var("QUEUE_PREFIX").unwrap_or(defaults.prefix),
            keep_completed: std::env::var("QUEUE_KEEP_COMPLETED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.keep_completed),
            keep_failed: std::env::var("QUEUE_KEEP_FAILED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.keep_failed),
            lock_ttl: std::env::var("QUEUE_LOCK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_ttl),
        }
    }
}

/// A durable job queue with per-queue FIFO order.
///
/// Job lifecycle: `waiting -> active -> completed`, or on failure back to
/// `waiting` after an exponential backoff until attempts run out, then
/// `failed`. Terminal records are retained up to a per-queue bound.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job. A job id that is still waiting or active is coalesced into
    /// the existing job; a terminal one is replaced.
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<EnqueueOutcome>;

    /// Take the oldest runnable job and mark it active under a fresh lease.
    async fn next_job(&self, queue: &str) -> QueueResult<Option<JobRecord>>;

    /// Record progress (clamped to 0-100, last write wins).
    async fn update_progress(&self, queue: &str, id: &JobId, percent: u8) -> QueueResult<()>;

    /// Mark an active job completed with `result`.
    async fn complete(&self, queue: &str, id: &JobId, result: serde_json::Value)
        -> QueueResult<()>;

    /// Record a failed run. Non-retryable failures skip remaining attempts.
    async fn fail(
        &self,
        queue: &str,
        id: &JobId,
        reason: &str,
        retryable: bool,
    ) -> QueueResult<FailureOutcome>;

    /// Renew the lease of an active job. Returns false if the job is no
    /// longer active.
    async fn extend_lock(&self, queue: &str, id: &JobId) -> QueueResult<bool>;

    /// Return active jobs with expired leases to the waiting list.
    async fn recover_stalled(&self, queue: &str) -> QueueResult<u32>;

    async fn get_job(&self, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>>;

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts>;
}

/// Validate and enqueue a typed payload on its kind's queue with the kind's
/// retry defaults.
pub async fn submit<P: JobPayload>(
    queue: &dyn JobQueue,
    job_id: impl Into<JobId>,
    payload: &P,
) -> QueueResult<EnqueueOutcome> {
    payload
        .validate()
        .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;

    let kind = P::KIND;
    let options = JobOptions::for_kind(job_id, kind);
    let job_id = options.job_id.clone();
    let value = serde_json::to_value(payload)?;

    let outcome = queue
        .enqueue(kind.as_str(), kind.as_str(), value, options)
        .await?;
    match outcome {
        EnqueueOutcome::Enqueued => info!("Enqueued {} job {}", kind, job_id),
        EnqueueOutcome::Duplicate => debug!("Coalesced duplicate {} job {}", kind, job_id),
    }
    Ok(outcome)
}
