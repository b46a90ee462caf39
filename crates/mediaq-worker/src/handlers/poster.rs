//! Poster handler: resized width variants of one source image.

use std::sync::Arc;

use async_trait::async_trait;
use image::GenericImageView;

use mediaq_media::{decode, encode, resize_to_width, EncodeOptions};
use mediaq_models::{object_url, JobKind, JobPayload, PosterJob, PosterVariant};
use mediaq_queue::JobRecord;
use mediaq_storage::{ObjectStore, PutOptions};

use super::{run_blocking, JobHandler};
use crate::config::PosterSettings;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::{percent, ProgressReporter};

pub struct PosterHandler {
    store: Arc<dyn ObjectStore>,
    settings: PosterSettings,
}

impl PosterHandler {
    pub fn new(store: Arc<dyn ObjectStore>, settings: PosterSettings) -> Self {
        Self { store, settings }
    }

    /// Object key of the variant for `width`.
    fn variant_key(prefix: &str, width: u32) -> String {
        format!("{}poster-{}w.webp", prefix, width)
    }

    /// Produce every requested variant in input order.
    ///
    /// Variants uploaded before a failure are left in place.
    pub async fn run(
        &self,
        job: &PosterJob,
        progress: &ProgressReporter,
    ) -> WorkerResult<Vec<PosterVariant>> {
        let logger = JobLogger::new(progress.job_id(), JobKind::Poster.as_str());
        let sizes = job.sizes().to_vec();

        let source = self
            .store
            .download_buffer(&job.source_bucket, &job.source_key)
            .await?;
        logger.log_progress(&format!(
            "downloaded {}/{} ({} bytes)",
            job.source_bucket,
            job.source_key,
            source.len()
        ));

        let image = Arc::new(run_blocking(move || Ok(decode(&source)?)).await?);
        let options = EncodeOptions::new(PosterSettings::FORMAT, self.settings.quality);
        let content_type = PosterSettings::FORMAT.content_type();

        let mut variants = Vec::with_capacity(sizes.len());
        for (i, &size) in sizes.iter().enumerate() {
            let image = Arc::clone(&image);
            let (bytes, width, height) = run_blocking(move || {
                let resized = resize_to_width(&image, size)?;
                let (width, height) = resized.dimensions();
                Ok((encode(&resized, options)?, width, height))
            })
            .await?;

            let key = Self::variant_key(&job.output_prefix, size);
            let size_bytes = bytes.len() as u64;
            self.store
                .upload_buffer(
                    &job.output_bucket,
                    &key,
                    bytes,
                    PutOptions::content_type(content_type),
                )
                .await?;
            metrics::record_bytes_uploaded(JobKind::Poster.as_str(), size_bytes);

            variants.push(PosterVariant {
                size,
                width,
                height,
                url: object_url(&job.output_bucket, &key),
                format: PosterSettings::FORMAT.as_str().to_string(),
                size_bytes,
            });
            progress.report(percent(i + 1, sizes.len(), 100)).await?;
        }

        Ok(variants)
    }
}

#[async_trait]
impl JobHandler for PosterHandler {
    fn kind(&self) -> JobKind {
        JobKind::Poster
    }

    async fn handle(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
    ) -> WorkerResult<serde_json::Value> {
        let payload = PosterJob::from_value(job.payload.clone())?;
        let variants = self.run(&payload, progress).await?;
        Ok(serde_json::to_value(variants)?)
    }
}
