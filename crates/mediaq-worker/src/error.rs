//! Worker error types.

use thiserror::Error;

use mediaq_models::ValidationError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure of a job attempt.
///
/// The display string is recorded verbatim as the job's failure reason, so
/// the wrapped variants forward the inner message unchanged.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Storage(#[from] mediaq_storage::StorageError),

    #[error("{0}")]
    Queue(#[from] mediaq_queue::QueueError),

    #[error("{0}")]
    Media(#[from] mediaq_media::MediaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            Self::Panicked(e.to_string())
        } else {
            Self::Join(e.to_string())
        }
    }
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Bad payload; every attempt would fail the same way.
    pub fn is_validation(&self) -> bool {
        matches!(self, WorkerError::Validation(_))
    }

    /// Check if error is expected to clear up on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Queue(_) | WorkerError::Join(_) => true,
            _ => false,
        }
    }

    /// Misconfiguration; no later attempt can succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            WorkerError::ConfigError(_) => true,
            WorkerError::Storage(e) => !e.is_retryable(),
            _ => false,
        }
    }

    /// Coarse class used as a metrics label.
    pub fn class(&self) -> &'static str {
        match self {
            WorkerError::Validation(_) => "validation",
            WorkerError::Storage(_) | WorkerError::Queue(_) => "io",
            WorkerError::Media(_) => "encoding",
            WorkerError::Serialization(_)
            | WorkerError::Join(_)
            | WorkerError::Panicked(_)
            | WorkerError::ConfigError(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_storage::StorageError;

    #[test]
    fn test_failure_reason_is_inner_message() {
        let err: WorkerError = ValidationError::new("sourceBucket and sourceKey are required").into();
        assert_eq!(err.to_string(), "sourceBucket and sourceKey are required");
        assert!(err.is_validation());
        assert!(!err.is_retryable());

        let err: WorkerError = StorageError::not_found("src", "a.jpg").into();
        assert_eq!(err.to_string(), "Object not found: src/a.jpg");
        assert!(err.is_retryable());
        assert_eq!(err.class(), "io");
    }

    #[test]
    fn test_permanent_errors() {
        assert!(WorkerError::config_error("missing S3_ENDPOINT_URL").is_permanent());
        let err: WorkerError = StorageError::config_error("bad credentials").into();
        assert!(err.is_permanent());
        let err: WorkerError = StorageError::upload_failed("timeout").into();
        assert!(!err.is_permanent());
        let err: WorkerError = ValidationError::new("images must be a non-empty array").into();
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_media_errors_are_not_retryable() {
        let err: WorkerError = mediaq_media::MediaError::decode_failed("bad header").into();
        assert!(!err.is_retryable());
        assert_eq!(err.class(), "encoding");
    }
}
