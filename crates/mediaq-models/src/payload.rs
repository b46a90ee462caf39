//! Job payload schemas consumed from the queue.
//!
//! Field names are camelCase on the wire. Required string fields default to
//! empty on deserialization so that a missing field and an empty one are
//! reported by the same validation message, before any storage I/O.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::job::JobKind;

/// Poster widths produced when the payload does not list any.
pub const DEFAULT_POSTER_SIZES: [u32; 3] = [100, 400, 1200];
/// Sprite grid `[cols, rows]` when the payload does not set one.
pub const DEFAULT_GRID_SIZE: [u32; 2] = [10, 10];
pub const DEFAULT_THUMB_WIDTH: u32 = 320;
pub const DEFAULT_THUMB_HEIGHT: u32 = 180;
/// Largest sprite sheet side in pixels (the WebP format limit).
pub const MAX_SHEET_DIMENSION: u32 = 16383;
pub const DEFAULT_OPTIMIZE_QUALITY: u8 = 85;
pub const DEFAULT_OPTIMIZE_FORMAT: ImageFormat = ImageFormat::Webp;

/// Accepted spellings of the optimize `format` field.
pub const SUPPORTED_FORMATS: [&str; 5] = ["webp", "jpeg", "jpg", "png", "avif"];

/// A typed payload bound to one job kind.
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync {
    const KIND: JobKind;

    /// Check required fields and ranges. Runs before any I/O.
    fn validate(&self) -> ValidationResult<()>;

    /// Decode and validate a raw queue payload.
    fn from_value(value: serde_json::Value) -> ValidationResult<Self> {
        let payload: Self = serde_json::from_value(value).map_err(|e| {
            ValidationError::new(format!("Invalid {} payload: {}", Self::KIND, e))
        })?;
        payload.validate()?;
        Ok(payload)
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Encoded output format of a derivative image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Jpeg,
    Png,
    Avif,
}

impl ImageFormat {
    /// Canonical encoder name (`jpg` resolves to `jpeg`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Avif => "avif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Avif => "image/avif",
        }
    }

    /// Case-insensitive parse accepting the `jpg` alias.
    pub fn parse(s: &str) -> ValidationResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(ImageFormat::Webp),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "avif" => Ok(ImageFormat::Avif),
            _ => Err(ValidationError::new(format!(
                "Unsupported format: {}. Supported formats: {}",
                s,
                SUPPORTED_FORMATS.join(", ")
            ))),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Poster job: N resized width variants of one source image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PosterJob {
    #[serde(default)]
    pub source_bucket: String,
    #[serde(default)]
    pub source_key: String,
    #[serde(default)]
    pub output_bucket: String,
    #[serde(default)]
    pub output_prefix: String,
    /// Target widths in output order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<Vec<u32>>,
}

impl PosterJob {
    pub fn new(
        source_bucket: impl Into<String>,
        source_key: impl Into<String>,
        output_bucket: impl Into<String>,
        output_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            source_key: source_key.into(),
            output_bucket: output_bucket.into(),
            output_prefix: output_prefix.into(),
            sizes: None,
        }
    }

    /// Set explicit target widths.
    pub fn with_sizes(mut self, sizes: Vec<u32>) -> Self {
        self.sizes = Some(sizes);
        self
    }

    /// Requested widths, falling back to the defaults.
    pub fn sizes(&self) -> &[u32] {
        self.sizes.as_deref().unwrap_or(&DEFAULT_POSTER_SIZES)
    }
}

impl JobPayload for PosterJob {
    const KIND: JobKind = JobKind::Poster;

    fn validate(&self) -> ValidationResult<()> {
        if is_blank(&self.source_bucket) || is_blank(&self.source_key) {
            return Err(ValidationError::new("sourceBucket and sourceKey are required"));
        }
        if is_blank(&self.output_bucket) || is_blank(&self.output_prefix) {
            return Err(ValidationError::new(
                "outputBucket and outputPrefix are required",
            ));
        }
        let sizes = self.sizes();
        if sizes.is_empty() || sizes.iter().any(|&w| w == 0) {
            return Err(ValidationError::new(
                "sizes must be a non-empty list of positive widths",
            ));
        }
        Ok(())
    }
}

/// One source frame of a sprite job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpriteImage {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    /// Position of the frame in the source video, in seconds
    #[serde(default)]
    pub timestamp: f64,
}

impl SpriteImage {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, timestamp: f64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            timestamp,
        }
    }
}

/// Sprite job: thumbnails tiled into one or more grid sheets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpriteJob {
    #[serde(default)]
    pub images: Vec<SpriteImage>,
    #[serde(default)]
    pub output_bucket: String,
    #[serde(default)]
    pub output_prefix: String,
    /// `[cols, rows]` per sheet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_height: Option<u32>,
}

impl SpriteJob {
    pub fn new(
        images: Vec<SpriteImage>,
        output_bucket: impl Into<String>,
        output_prefix: impl Into<String>,
    ) -> Self {
        Self {
            images,
            output_bucket: output_bucket.into(),
            output_prefix: output_prefix.into(),
            grid_size: None,
            thumb_width: None,
            thumb_height: None,
        }
    }

    pub fn with_grid(mut self, cols: u32, rows: u32) -> Self {
        self.grid_size = Some([cols, rows]);
        self
    }

    pub fn with_thumb_size(mut self, width: u32, height: u32) -> Self {
        self.thumb_width = Some(width);
        self.thumb_height = Some(height);
        self
    }

    /// Columns per sheet.
    pub fn cols(&self) -> u32 {
        self.grid_size.unwrap_or(DEFAULT_GRID_SIZE)[0]
    }

    /// Rows per sheet.
    pub fn rows(&self) -> u32 {
        self.grid_size.unwrap_or(DEFAULT_GRID_SIZE)[1]
    }

    pub fn thumb_width(&self) -> u32 {
        self.thumb_width.unwrap_or(DEFAULT_THUMB_WIDTH)
    }

    pub fn thumb_height(&self) -> u32 {
        self.thumb_height.unwrap_or(DEFAULT_THUMB_HEIGHT)
    }

    /// Pixel size of the largest sheet this job can produce.
    ///
    /// A sheet spans at most `cols` columns and `rows` rows, and never more
    /// cells than there are images.
    pub fn max_sheet_size(&self) -> (u64, u64) {
        let count = self.images.len() as u64;
        let cols = u64::from(self.cols()).min(count);
        let rows = u64::from(self.rows()).min(count.div_ceil(u64::from(self.cols()).max(1)));
        (
            cols * u64::from(self.thumb_width()),
            rows * u64::from(self.thumb_height()),
        )
    }
}

impl JobPayload for SpriteJob {
    const KIND: JobKind = JobKind::Sprite;

    fn validate(&self) -> ValidationResult<()> {
        if self.images.is_empty() {
            return Err(ValidationError::new("images must be a non-empty array"));
        }
        if is_blank(&self.output_bucket) || is_blank(&self.output_prefix) {
            return Err(ValidationError::new(
                "outputBucket and outputPrefix are required",
            ));
        }
        if let Some(idx) = self
            .images
            .iter()
            .position(|img| is_blank(&img.bucket) || is_blank(&img.key))
        {
            return Err(ValidationError::new(format!(
                "images[{}] requires bucket and key",
                idx
            )));
        }
        if self.cols() == 0 || self.rows() == 0 {
            return Err(ValidationError::new(
                "gridSize must contain two positive integers",
            ));
        }
        if self.thumb_width() == 0 || self.thumb_height() == 0 {
            return Err(ValidationError::new(
                "thumbWidth and thumbHeight must be positive",
            ));
        }
        let (sheet_w, sheet_h) = self.max_sheet_size();
        let limit = u64::from(MAX_SHEET_DIMENSION);
        if sheet_w > limit || sheet_h > limit {
            return Err(ValidationError::new(format!(
                "sprite sheet of {}x{} pixels exceeds the limit of {} per side; reduce gridSize or thumb size",
                sheet_w, sheet_h, MAX_SHEET_DIMENSION
            )));
        }
        Ok(())
    }
}

/// Optimize job: re-encode one image to a target format and quality.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeJob {
    #[serde(default)]
    pub source_bucket: String,
    #[serde(default)]
    pub source_key: String,
    #[serde(default)]
    pub output_bucket: String,
    #[serde(default)]
    pub output_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    /// One of `webp`, `jpeg`, `jpg`, `png`, `avif` (any case)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl OptimizeJob {
    pub fn new(
        source_bucket: impl Into<String>,
        source_key: impl Into<String>,
        output_bucket: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            source_key: source_key.into(),
            output_bucket: output_bucket.into(),
            output_key: output_key.into(),
            quality: None,
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Encoder quality, falling back to the default.
    pub fn quality(&self) -> u8 {
        self.quality
            .map(|q| q.clamp(1, 100) as u8)
            .unwrap_or(DEFAULT_OPTIMIZE_QUALITY)
    }

    /// Resolved output format.
    pub fn format(&self) -> ValidationResult<ImageFormat> {
        match &self.format {
            Some(f) => ImageFormat::parse(f),
            None => Ok(DEFAULT_OPTIMIZE_FORMAT),
        }
    }
}

impl JobPayload for OptimizeJob {
    const KIND: JobKind = JobKind::Optimize;

    fn validate(&self) -> ValidationResult<()> {
        if is_blank(&self.source_bucket)
            || is_blank(&self.source_key)
            || is_blank(&self.output_bucket)
            || is_blank(&self.output_key)
        {
            return Err(ValidationError::new(
                "sourceBucket, sourceKey, outputBucket, and outputKey are required",
            ));
        }
        if let Some(q) = self.quality {
            if !(1..=100).contains(&q) {
                return Err(ValidationError::new("quality must be between 1 and 100"));
            }
        }
        self.format()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_poster_defaults_and_validation() {
        let job = PosterJob::from_value(json!({
            "sourceBucket": "media",
            "sourceKey": "posters/abc.jpg",
            "outputBucket": "derived",
            "outputPrefix": "posters/abc/"
        }))
        .unwrap();
        assert_eq!(job.sizes(), &[100, 400, 1200]);

        let err = PosterJob::from_value(json!({
            "sourceBucket": "media",
            "outputBucket": "derived",
            "outputPrefix": "p/"
        }))
        .unwrap_err();
        assert_eq!(err.message(), "sourceBucket and sourceKey are required");

        let err = PosterJob::from_value(json!({
            "sourceBucket": "media",
            "sourceKey": "k",
            "outputBucket": "derived"
        }))
        .unwrap_err();
        assert_eq!(err.message(), "outputBucket and outputPrefix are required");
    }

    #[test]
    fn test_poster_rejects_empty_or_zero_sizes() {
        let job = PosterJob::new("a", "b", "c", "d/").with_sizes(vec![]);
        assert!(job.validate().is_err());
        let job = PosterJob::new("a", "b", "c", "d/").with_sizes(vec![100, 0]);
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_poster_type_mismatch_is_validation_error() {
        let err = PosterJob::from_value(json!({
            "sourceBucket": "media",
            "sourceKey": "k",
            "outputBucket": "o",
            "outputPrefix": "p/",
            "sizes": "big"
        }))
        .unwrap_err();
        assert!(err.message().starts_with("Invalid poster payload"));
    }

    #[test]
    fn test_sprite_defaults() {
        let job = SpriteJob::from_value(json!({
            "images": [{"bucket": "frames", "key": "f0.jpg", "timestamp": 0}],
            "outputBucket": "derived",
            "outputPrefix": "sprites/abc/"
        }))
        .unwrap();
        assert_eq!((job.cols(), job.rows()), (10, 10));
        assert_eq!((job.thumb_width(), job.thumb_height()), (320, 180));
    }

    #[test]
    fn test_sprite_validation() {
        let err = SpriteJob::new(vec![], "o", "p/").validate().unwrap_err();
        assert_eq!(err.message(), "images must be a non-empty array");

        let images = vec![SpriteImage::new("b", "k", 0.0), SpriteImage::new("b", "", 1.0)];
        let err = SpriteJob::new(images, "o", "p/").validate().unwrap_err();
        assert_eq!(err.message(), "images[1] requires bucket and key");

        let images = vec![SpriteImage::new("b", "k", 0.0)];
        let err = SpriteJob::new(images, "o", "p/")
            .with_grid(0, 5)
            .validate()
            .unwrap_err();
        assert!(err.message().contains("gridSize"));
    }

    #[test]
    fn test_sprite_sheet_size_limit() {
        let frames = |n: usize| {
            (0..n)
                .map(|i| SpriteImage::new("b", format!("f{}.png", i), i as f64))
                .collect::<Vec<_>>()
        };

        // 60 tiles of 320px in one row would be 19200px wide.
        let err = SpriteJob::new(frames(60), "o", "p/")
            .with_grid(60, 1)
            .validate()
            .unwrap_err();
        assert!(err.message().contains("19200x180"));
        assert!(err.message().contains("16383"));

        // The same grid is fine while the images only fill part of it.
        assert!(SpriteJob::new(frames(3), "o", "p/")
            .with_grid(60, 1)
            .validate()
            .is_ok());

        let err = SpriteJob::new(frames(400), "o", "p/")
            .with_grid(1, 400)
            .validate()
            .unwrap_err();
        assert!(err.message().contains("320x72000"));

        let err = SpriteJob::new(frames(1), "o", "p/")
            .with_thumb_size(u32::MAX, u32::MAX)
            .validate()
            .unwrap_err();
        assert!(err.message().contains("exceeds the limit"));

        let job = SpriteJob::from_value(serde_json::json!({
            "images": [{"bucket": "b", "key": "k", "timestamp": 0.0}],
            "outputBucket": "o",
            "outputPrefix": "p/",
            "thumbWidth": 16383,
            "thumbHeight": 16383
        }))
        .unwrap();
        assert_eq!(job.max_sheet_size(), (16383, 16383));
    }

    #[test]
    fn test_optimize_format_aliases() {
        let jpg = OptimizeJob::new("a", "b", "c", "d").with_format("JPG");
        let jpeg = OptimizeJob::new("a", "b", "c", "d").with_format("jpeg");
        assert_eq!(jpg.format().unwrap(), ImageFormat::Jpeg);
        assert_eq!(jpeg.format().unwrap(), ImageFormat::Jpeg);
        assert_eq!(jpg.format().unwrap().content_type(), "image/jpeg");
        assert_eq!(jpg.format().unwrap().as_str(), "jpeg");
    }

    #[test]
    fn test_optimize_unknown_format_lists_supported() {
        let err = OptimizeJob::new("a", "b", "c", "d")
            .with_format("bmp")
            .validate()
            .unwrap_err();
        assert!(err.message().contains("bmp"));
        for name in SUPPORTED_FORMATS {
            assert!(err.message().contains(name));
        }
    }

    #[test]
    fn test_optimize_quality_range() {
        let job = OptimizeJob::new("a", "b", "c", "d").with_quality(0);
        assert!(job.validate().is_err());
        let job = OptimizeJob::new("a", "b", "c", "d").with_quality(101);
        assert!(job.validate().is_err());
        let job = OptimizeJob::new("a", "b", "c", "d");
        assert_eq!(job.quality(), 85);
        assert_eq!(job.format().unwrap(), ImageFormat::Webp);
    }
}
