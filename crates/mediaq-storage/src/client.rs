//! S3 client implementation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectMeta, ObjectStore, PutOptions};

/// Region S3 treats as the default; bucket creation there takes no location.
const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint (MinIO, R2, AWS...)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    pub region: String,
    /// Address buckets as `{endpoint}/{bucket}` instead of by subdomain
    pub force_path_style: bool,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("S3_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            force_path_style: std::env::var("S3_FORCE_PATH_STYLE")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
        })
    }
}

/// S3-compatible storage client.
///
/// Buckets confirmed to exist are remembered for the lifetime of the client
/// so uploads only pay for the existence check once per bucket.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    region: String,
    known_buckets: Arc<RwLock<HashSet<String>>>,
}

impl S3Client {
    /// Create a new S3 client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "mediaq",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            region: config.region,
            known_buckets: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    /// List bucket names. Used as a connectivity check.
    pub async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let response = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(sdk_message(&e)))?;

        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || has_status(&e, 404);
                if not_found {
                    Ok(false)
                } else {
                    Err(StorageError::bucket_failed(format!(
                        "head {}: {}",
                        bucket,
                        sdk_message(&e)
                    )))
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!("Created bucket {}", bucket);
                Ok(())
            }
            // Another job created it between our check and our create.
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists())
                    .unwrap_or(false) =>
            {
                Ok(())
            }
            Err(e) => Err(StorageError::bucket_failed(format!(
                "create {}: {}",
                bucket,
                sdk_message(&e)
            ))),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn download_buffer(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        debug!("Downloading {}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::not_found(bucket, key)
                } else {
                    StorageError::download_failed(sdk_message(&e))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn upload_buffer(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        options: PutOptions,
    ) -> StorageResult<String> {
        self.ensure_bucket(bucket).await?;

        debug!("Uploading {} bytes to {}/{}", data.len(), bucket, key);

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data));
        if let Some(content_type) = options.content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(sdk_message(&e)))?;

        Ok(key.to_string())
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || has_status(&e, 404);
                if missing {
                    StorageError::not_found(bucket, key)
                } else {
                    StorageError::AwsSdk(sdk_message(&e))
                }
            })?;

        Ok(ObjectMeta {
            size: response.content_length().unwrap_or(0).max(0) as u64,
            content_type: response.content_type().map(str::to_string),
            last_modified: response
                .last_modified()
                .and_then(|t| t.to_millis().ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            etag: response.e_tag().map(str::to_string),
        })
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(sdk_message(&e)))?;

        Ok(presigned.uri().to_string())
    }

    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.known_buckets.read().await.contains(bucket) {
            return Ok(());
        }

        if !self.bucket_exists(bucket).await? {
            self.create_bucket(bucket).await?;
        }

        self.known_buckets.write().await.insert(bucket.to_string());
        Ok(())
    }
}

fn sdk_message<E: std::error::Error + 'static>(err: &SdkError<E>) -> String {
    DisplayErrorContext(err).to_string()
}

fn has_status<E>(err: &SdkError<E>, status: u16) -> bool {
    err.raw_response()
        .map(|r| r.status().as_u16() == status)
        .unwrap_or(false)
}
