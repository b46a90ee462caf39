//! Optimize handler: re-encode one image to a target format and quality.

use std::sync::Arc;

use async_trait::async_trait;

use mediaq_media::{decode, encode, EncodeOptions};
use mediaq_models::{object_url, JobKind, JobPayload, OptimizeJob, OptimizedImage};
use mediaq_queue::JobRecord;
use mediaq_storage::{ObjectStore, PutOptions};

use super::{run_blocking, JobHandler};
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::ProgressReporter;

pub struct OptimizeHandler {
    store: Arc<dyn ObjectStore>,
}

impl OptimizeHandler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        job: &OptimizeJob,
        progress: &ProgressReporter,
    ) -> WorkerResult<OptimizedImage> {
        let logger = JobLogger::new(progress.job_id(), JobKind::Optimize.as_str());
        let format = job.format()?;
        let options = EncodeOptions::new(format, job.quality());
        progress.report(10).await?;

        let source = self
            .store
            .download_buffer(&job.source_bucket, &job.source_key)
            .await?;
        let original_size = source.len() as u64;
        progress.report(40).await?;

        let optimized = run_blocking(move || {
            let image = decode(&source)?;
            Ok(encode(&image, options)?)
        })
        .await?;
        let optimized_size = optimized.len() as u64;
        progress.report(80).await?;

        self.store
            .upload_buffer(
                &job.output_bucket,
                &job.output_key,
                optimized,
                PutOptions::content_type(format.content_type()),
            )
            .await?;
        metrics::record_bytes_uploaded(JobKind::Optimize.as_str(), optimized_size);
        progress.report(100).await?;

        let result = OptimizedImage {
            url: object_url(&job.output_bucket, &job.output_key),
            original_size,
            optimized_size,
            savings_percent: OptimizedImage::savings_percent(original_size, optimized_size),
            format: format.as_str().to_string(),
        };
        logger.log_progress(&format!(
            "{} -> {} bytes as {} ({}% saved)",
            original_size, optimized_size, result.format, result.savings_percent
        ));
        Ok(result)
    }
}

#[async_trait]
impl JobHandler for OptimizeHandler {
    fn kind(&self) -> JobKind {
        JobKind::Optimize
    }

    async fn handle(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
    ) -> WorkerResult<serde_json::Value> {
        let payload = OptimizeJob::from_value(job.payload.clone())?;
        let result = self.run(&payload, progress).await?;
        Ok(serde_json::to_value(result)?)
    }
}
