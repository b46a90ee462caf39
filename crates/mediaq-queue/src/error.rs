//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job is no longer held by a worker (lease lost or already finished)
    #[error("Job is not active: {0}")]
    JobNotActive(String),

    #[error("Corrupt job record: {0}")]
    InvalidRecord(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }
}
