//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Bucket operation failed: {0}")]
    BucketFailed(String),

    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Not-found error for `bucket/key`.
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound(format!("{}/{}", bucket, key))
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn bucket_failed(msg: impl Into<String>) -> Self {
        Self::BucketFailed(msg.into())
    }

    /// Misconfiguration never heals on its own; everything else may.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StorageError::ConfigError(_))
    }
}
