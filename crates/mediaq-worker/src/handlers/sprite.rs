//! Sprite handler: thumbnails tiled into grid sheets.
//!
//! Phase one resizes every frame to a webp tile held in memory (0-50%);
//! phase two composites the tiles into sheets and uploads them (50-100%).
//! Peak memory grows with `images * tile size`.

use std::sync::Arc;

use async_trait::async_trait;

use mediaq_media::{compose_sheet, cover_fit, decode, encode, plan_sheets, EncodeOptions};
use mediaq_models::{object_url, ImageFormat, JobKind, JobPayload, SpriteJob, SpriteSheet};
use mediaq_queue::JobRecord;
use mediaq_storage::{ObjectStore, PutOptions};

use super::{run_blocking, JobHandler};
use crate::config::SpriteSettings;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::{percent, ProgressReporter};

/// Resize progress is reported at least this often.
const RESIZE_REPORT_EVERY: usize = 10;

pub struct SpriteHandler {
    store: Arc<dyn ObjectStore>,
    settings: SpriteSettings,
}

impl SpriteHandler {
    pub fn new(store: Arc<dyn ObjectStore>, settings: SpriteSettings) -> Self {
        Self { store, settings }
    }

    pub async fn run(
        &self,
        job: &SpriteJob,
        progress: &ProgressReporter,
    ) -> WorkerResult<Vec<SpriteSheet>> {
        let logger = JobLogger::new(progress.job_id(), JobKind::Sprite.as_str());
        let tiles = self.resize_tiles(job, progress).await?;
        logger.log_progress(&format!("resized {} frames", tiles.len()));
        self.composite_sheets(job, Arc::new(tiles), progress).await
    }

    async fn resize_tiles(
        &self,
        job: &SpriteJob,
        progress: &ProgressReporter,
    ) -> WorkerResult<Vec<Vec<u8>>> {
        let (thumb_width, thumb_height) = (job.thumb_width(), job.thumb_height());
        let options = EncodeOptions::webp(self.settings.tile_quality);
        let total = job.images.len();

        let mut tiles = Vec::with_capacity(total);
        for (i, frame) in job.images.iter().enumerate() {
            let source = self.store.download_buffer(&frame.bucket, &frame.key).await?;
            let tile = run_blocking(move || {
                let image = decode(&source)?;
                let thumb = cover_fit(&image, thumb_width, thumb_height)?;
                Ok(encode(&thumb, options)?)
            })
            .await?;
            tiles.push(tile);

            let done = i + 1;
            if done % RESIZE_REPORT_EVERY == 0 || done == total {
                progress.report(percent(done, total, 50)).await?;
            }
        }
        Ok(tiles)
    }

    async fn composite_sheets(
        &self,
        job: &SpriteJob,
        tiles: Arc<Vec<Vec<u8>>>,
        progress: &ProgressReporter,
    ) -> WorkerResult<Vec<SpriteSheet>> {
        let cols = job.cols();
        let (thumb_width, thumb_height) = (job.thumb_width(), job.thumb_height());
        let options = EncodeOptions::webp(self.settings.sheet_quality);
        let layouts = plan_sheets(tiles.len(), cols, job.rows());

        let mut sheets = Vec::with_capacity(layouts.len());
        for layout in &layouts {
            let layout = *layout;
            let tiles = Arc::clone(&tiles);
            let bytes = run_blocking(move || {
                let decoded = tiles[layout.start_index..=layout.end_index()]
                    .iter()
                    .map(|tile| decode(tile))
                    .collect::<Result<Vec<_>, _>>()?;
                let sheet = compose_sheet(&decoded, &layout, cols, thumb_width, thumb_height)?;
                Ok(encode(&sheet, options)?)
            })
            .await?;

            let key = format!("{}sprite-{}.webp", job.output_prefix, layout.sheet_index);
            let size = bytes.len() as u64;
            self.store
                .upload_buffer(
                    &job.output_bucket,
                    &key,
                    bytes,
                    PutOptions::content_type(ImageFormat::Webp.content_type()),
                )
                .await?;
            metrics::record_bytes_uploaded(JobKind::Sprite.as_str(), size);

            sheets.push(SpriteSheet {
                sheet_index: layout.sheet_index,
                start_index: layout.start_index as u32,
                end_index: layout.end_index() as u32,
                grid_width: layout.grid_width,
                grid_height: layout.grid_height,
                thumb_width,
                thumb_height,
                url: object_url(&job.output_bucket, &key),
            });

            let done = layout.sheet_index as usize + 1;
            progress
                .report(50 + percent(done, layouts.len(), 50))
                .await?;
        }
        Ok(sheets)
    }
}

#[async_trait]
impl JobHandler for SpriteHandler {
    fn kind(&self) -> JobKind {
        JobKind::Sprite
    }

    async fn handle(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
    ) -> WorkerResult<serde_json::Value> {
        let payload = SpriteJob::from_value(job.payload.clone())?;
        let sheets = self.run(&payload, progress).await?;
        Ok(serde_json::to_value(sheets)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{activate, png_bytes, solid_png};
    use image::GenericImageView;
    use mediaq_storage::MemoryStore;
    use serde_json::json;

    const THUMB_W: u32 = 16;
    const THUMB_H: u32 = 9;

    async fn seed_frames(store: &MemoryStore, count: usize) -> serde_json::Value {
        let frame = png_bytes(64, 48);
        let mut images = Vec::with_capacity(count);
        for i in 0..count {
            let key = format!("frames/f{:03}.png", i);
            store.insert("frames", &key, frame.clone()).await;
            images.push(json!({"bucket": "frames", "key": key, "timestamp": i as f64 * 2.0}));
        }
        serde_json::Value::Array(images)
    }

    fn payload(images: serde_json::Value, cols: u32, rows: u32) -> serde_json::Value {
        json!({
            "images": images,
            "outputBucket": "derived",
            "outputPrefix": "sprites/v1/",
            "gridSize": [cols, rows],
            "thumbWidth": THUMB_W,
            "thumbHeight": THUMB_H
        })
    }

    fn handler(store: &MemoryStore) -> SpriteHandler {
        SpriteHandler::new(Arc::new(store.clone()), SpriteSettings::default())
    }

    #[tokio::test]
    async fn test_partial_sheet_spans_full_columns() {
        let store = MemoryStore::new();
        let images = seed_frames(&store, 12).await;
        let (queue, job, reporter) =
            activate(JobKind::Sprite, "sprite-b", payload(images, 5, 5)).await;

        let result = handler(&store).handle(&job, &reporter).await.unwrap();
        let sheets: Vec<SpriteSheet> = serde_json::from_value(result).unwrap();

        assert_eq!(sheets.len(), 1);
        let sheet = &sheets[0];
        assert_eq!((sheet.start_index, sheet.end_index), (0, 11));
        assert_eq!((sheet.grid_width, sheet.grid_height), (5, 3));
        assert_eq!(sheet.url, "derived/sprites/v1/sprite-0.webp");

        let bytes = store.get("derived", "sprites/v1/sprite-0.webp").await.unwrap();
        let image = decode(&bytes).unwrap();
        assert_eq!(image.dimensions(), (5 * THUMB_W, 3 * THUMB_H));

        // Cells 12..14 are empty and stay black.
        let (w, h) = image.dimensions();
        let corner = image.to_rgb8().get_pixel(w - 1, h - 1).0;
        assert!(corner.iter().all(|&c| c < 40), "expected black, got {:?}", corner);

        assert_eq!(
            queue.progress_history("sprite", &job.id).await,
            vec![42, 50, 100]
        );
    }

    #[tokio::test]
    async fn test_last_sheet_single_row_is_narrow() {
        let store = MemoryStore::new();
        let images = seed_frames(&store, 13).await;
        let (queue, job, reporter) =
            activate(JobKind::Sprite, "sprite-c", payload(images, 5, 2)).await;

        let result = handler(&store).handle(&job, &reporter).await.unwrap();
        let sheets: Vec<SpriteSheet> = serde_json::from_value(result).unwrap();

        let summary: Vec<_> = sheets
            .iter()
            .map(|s| (s.sheet_index, s.start_index, s.end_index, s.grid_width, s.grid_height))
            .collect();
        assert_eq!(summary, vec![(0, 0, 9, 5, 2), (1, 10, 12, 3, 1)]);
        assert_eq!(sheets[1].tile_count(), 3);

        assert_eq!(
            store.keys("derived").await,
            vec!["sprites/v1/sprite-0.webp", "sprites/v1/sprite-1.webp"]
        );
        let bytes = store.get("derived", "sprites/v1/sprite-1.webp").await.unwrap();
        assert_eq!(decode(&bytes).unwrap().dimensions(), (3 * THUMB_W, THUMB_H));

        assert_eq!(
            queue.progress_history("sprite", &job.id).await,
            vec![38, 50, 75, 100]
        );
    }

    #[tokio::test]
    async fn test_default_thumb_size_is_cover_fit() {
        let store = MemoryStore::new();
        store.insert("frames", "tall.png", png_bytes(90, 400)).await;
        let payload = json!({
            "images": [{"bucket": "frames", "key": "tall.png", "timestamp": 0}],
            "outputBucket": "derived",
            "outputPrefix": "t/"
        });
        let (_queue, job, reporter) = activate(JobKind::Sprite, "sprite-t", payload).await;

        let result = handler(&store).handle(&job, &reporter).await.unwrap();
        let sheets: Vec<SpriteSheet> = serde_json::from_value(result).unwrap();
        assert_eq!((sheets[0].thumb_width, sheets[0].thumb_height), (320, 180));
        assert_eq!((sheets[0].grid_width, sheets[0].grid_height), (1, 1));

        let bytes = store.get("derived", "t/sprite-0.webp").await.unwrap();
        assert_eq!(decode(&bytes).unwrap().dimensions(), (320, 180));
    }

    #[tokio::test]
    async fn test_frame_download_failure_aborts_job() {
        let store = MemoryStore::new();
        let mut images = seed_frames(&store, 2).await;
        images
            .as_array_mut()
            .unwrap()
            .push(json!({"bucket": "frames", "key": "gone.png", "timestamp": 9}));
        let (_queue, job, reporter) =
            activate(JobKind::Sprite, "sprite-gone", payload(images, 5, 5)).await;

        let err = handler(&store).handle(&job, &reporter).await.unwrap_err();
        assert_eq!(err.to_string(), "Object not found: frames/gone.png");
        assert!(store.keys("derived").await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_starts_again_from_first_frame() {
        let store = MemoryStore::new();
        let mut images = seed_frames(&store, 2).await;
        images
            .as_array_mut()
            .unwrap()
            .push(json!({"bucket": "frames", "key": "frames/late.png", "timestamp": 4}));
        let payload = payload(images, 5, 5);

        let (queue, job, reporter) = activate(JobKind::Sprite, "sprite-r", payload.clone()).await;
        let err = handler(&store).handle(&job, &reporter).await.unwrap_err();
        assert_eq!(err.to_string(), "Object not found: frames/late.png");
        assert!(queue.progress_history("sprite", &job.id).await.is_empty());

        // The retry must pick up the replaced first frame, not a cached tile.
        store
            .insert("frames", "frames/f000.png", solid_png(64, 48, [255, 0, 0]))
            .await;
        store.insert("frames", "frames/late.png", png_bytes(64, 48)).await;

        let (queue, job, reporter) = activate(JobKind::Sprite, "sprite-r", payload).await;
        let result = handler(&store).handle(&job, &reporter).await.unwrap();
        let sheets: Vec<SpriteSheet> = serde_json::from_value(result).unwrap();
        assert_eq!((sheets[0].start_index, sheets[0].end_index), (0, 2));

        let bytes = store.get("derived", "sprites/v1/sprite-0.webp").await.unwrap();
        let center = decode(&bytes)
            .unwrap()
            .to_rgb8()
            .get_pixel(THUMB_W / 2, THUMB_H / 2)
            .0;
        assert!(
            center[0] > 180 && center[1] < 80 && center[2] < 80,
            "expected red first tile, got {:?}",
            center
        );
        assert_eq!(
            queue.progress_history("sprite", &job.id).await,
            vec![50, 100]
        );
    }

    #[tokio::test]
    async fn test_oversized_sheet_rejected_before_download() {
        let store = MemoryStore::new();
        let images = seed_frames(&store, 60).await;
        store.fail_next_downloads(1);
        let payload = json!({
            "images": images,
            "outputBucket": "derived",
            "outputPrefix": "big/",
            "gridSize": [60, 1]
        });
        let (queue, job, reporter) = activate(JobKind::Sprite, "sprite-big", payload).await;

        let err = handler(&store).handle(&job, &reporter).await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("19200x180"));
        assert!(queue.progress_history("sprite", &job.id).await.is_empty());

        // The injected failure is still pending, so nothing was downloaded.
        assert!(store.download_buffer("frames", "frames/f000.png").await.is_err());
        assert!(store.keys("derived").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_images_rejected() {
        let store = MemoryStore::new();
        let (_queue, job, reporter) = activate(
            JobKind::Sprite,
            "sprite-empty",
            payload(json!([]), 5, 5),
        )
        .await;

        let err = handler(&store).handle(&job, &reporter).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "images must be a non-empty array");
    }
}
