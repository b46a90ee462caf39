//! The object storage abstraction consumed by job handlers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;

/// Options for a buffer upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
}

impl PutOptions {
    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
        }
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Buffer-based object I/O.
///
/// Implementations are shared by every handler of every queue, so they must
/// be cheap to call concurrently and hold no per-job state.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a whole object into memory.
    async fn download_buffer(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Store `data` under `key`, creating `bucket` first if it is missing.
    ///
    /// Returns the key written.
    async fn upload_buffer(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        options: PutOptions,
    ) -> StorageResult<String>;

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Time-limited GET URL for an object.
    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Create `bucket` unless it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;
}
