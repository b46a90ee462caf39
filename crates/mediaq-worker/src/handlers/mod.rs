//! Job handlers, one per queue.

mod optimize;
mod poster;
mod sprite;

pub use optimize::OptimizeHandler;
pub use poster::PosterHandler;
pub use sprite::SpriteHandler;

use async_trait::async_trait;

use mediaq_models::JobKind;
use mediaq_queue::JobRecord;

use crate::error::WorkerResult;
use crate::progress::ProgressReporter;

/// Turns one job payload into derivatives.
///
/// Returning `Ok` completes the job with the returned JSON; returning `Err`
/// hands the error to the queue's retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn handle(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
    ) -> WorkerResult<serde_json::Value>;
}

/// Run CPU-bound image work off the async executor.
async fn run_blocking<T, F>(f: F) -> WorkerResult<T>
where
    F: FnOnce() -> WorkerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use image::{DynamicImage, Rgb, RgbImage};

    use mediaq_media::{encode, EncodeOptions};
    use mediaq_models::{ImageFormat, JobKind};
    use mediaq_queue::{JobOptions, JobQueue, JobRecord, MemoryJobQueue};

    use crate::progress::ProgressReporter;

    /// Gradient image encoded as PNG.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        encode(&img, EncodeOptions::new(ImageFormat::Png, 100)).unwrap()
    }

    /// Single-color image encoded as PNG.
    pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        encode(&img, EncodeOptions::new(ImageFormat::Png, 100)).unwrap()
    }

    /// Enqueue `payload` on the kind's queue and take it as the active job.
    pub async fn activate(
        kind: JobKind,
        id: &str,
        payload: serde_json::Value,
    ) -> (Arc<MemoryJobQueue>, JobRecord, ProgressReporter) {
        let queue = Arc::new(MemoryJobQueue::default());
        queue
            .enqueue(
                kind.as_str(),
                kind.as_str(),
                payload,
                JobOptions::for_kind(id, kind),
            )
            .await
            .unwrap();
        let job = queue.next_job(kind.as_str()).await.unwrap().unwrap();
        let reporter = ProgressReporter::new(queue.clone(), kind.as_str(), job.id.clone());
        (queue, job, reporter)
    }
}
