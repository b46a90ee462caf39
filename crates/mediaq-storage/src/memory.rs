//! In-process object store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectMeta, ObjectStore, PutOptions};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: HashSet<String>,
    objects: HashMap<(String, String), StoredObject>,
}

/// Object store held entirely in memory.
///
/// Behaves like [`crate::S3Client`]: uploads create missing buckets,
/// downloads of absent objects fail with `NotFound`. Cloning shares the
/// underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    failing_downloads: Arc<AtomicU32>,
    failing_uploads: Arc<AtomicU32>,
    passing_uploads: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object (and its bucket) directly.
    pub async fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        let mut inner = self.inner.write().await;
        inner.buckets.insert(bucket.to_string());
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: None,
                last_modified: Utc::now(),
            },
        );
    }

    /// Raw bytes of an object, if present.
    pub async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .await
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    /// Sorted keys stored in `bucket`.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut keys: Vec<String> = inner
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.inner.read().await.buckets.contains(bucket)
    }

    /// Make the next `count` downloads fail with a transient error.
    pub fn fail_next_downloads(&self, count: u32) {
        self.failing_downloads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` uploads fail with a transient error.
    pub fn fail_next_uploads(&self, count: u32) {
        self.fail_uploads_after(0, count);
    }

    /// Let `ok` uploads through, then fail the following `count`.
    pub fn fail_uploads_after(&self, ok: u32, count: u32) {
        self.passing_uploads.store(ok, Ordering::SeqCst);
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    /// Decrement `counter` if it is non-zero.
    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn download_buffer(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        if Self::take_one(&self.failing_downloads) {
            return Err(StorageError::download_failed(format!(
                "injected failure for {}/{}",
                bucket, key
            )));
        }
        self.get(bucket, key)
            .await
            .ok_or_else(|| StorageError::not_found(bucket, key))
    }

    async fn upload_buffer(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        options: PutOptions,
    ) -> StorageResult<String> {
        let passes = Self::take_one(&self.passing_uploads);
        if !passes && Self::take_one(&self.failing_uploads) {
            return Err(StorageError::upload_failed(format!(
                "injected failure for {}/{}",
                bucket, key
            )));
        }
        self.ensure_bucket(bucket).await?;

        self.inner.write().await.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: options.content_type,
                last_modified: Utc::now(),
            },
        );
        Ok(key.to_string())
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let inner = self.inner.read().await;
        let object = inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::not_found(bucket, key))?;

        Ok(ObjectMeta {
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            last_modified: Some(object.last_modified),
            etag: None,
        })
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }

    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        if bucket.is_empty() {
            return Err(StorageError::bucket_failed("bucket name is empty"));
        }
        self.inner.write().await.buckets.insert(bucket.to_string());
        Ok(())
    }
}
