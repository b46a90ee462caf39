//! Derivative results recorded on completed jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Storage location reported in results: `{bucket}/{key}`, not an HTTP URL.
pub fn object_url(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, key)
}

/// One resized poster variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PosterVariant {
    /// Requested width
    pub size: u32,
    /// Actual width (never larger than the source)
    pub width: u32,
    pub height: u32,
    pub url: String,
    pub format: String,
    pub size_bytes: u64,
}

/// One composited sprite sheet.
///
/// `start_index..=end_index` indexes into the job's input image list; the
/// ranges of all sheets of a job are contiguous and cover every image once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpriteSheet {
    pub sheet_index: u32,
    pub start_index: u32,
    pub end_index: u32,
    /// Columns actually used by the sheet
    pub grid_width: u32,
    /// Rows actually used by the sheet
    pub grid_height: u32,
    pub thumb_width: u32,
    pub thumb_height: u32,
    pub url: String,
}

impl SpriteSheet {
    /// Number of tiles on the sheet.
    pub fn tile_count(&self) -> u32 {
        self.end_index - self.start_index + 1
    }
}

/// Result of an optimize job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedImage {
    pub url: String,
    pub original_size: u64,
    pub optimized_size: u64,
    /// Percentage saved, rounded to two decimals; negative when the output grew
    pub savings_percent: f64,
    pub format: String,
}

impl OptimizedImage {
    /// `round2((original - optimized) / original * 100)`, or 0 for an empty source.
    pub fn savings_percent(original_size: u64, optimized_size: u64) -> f64 {
        if original_size == 0 {
            return 0.0;
        }
        let saved = original_size as f64 - optimized_size as f64;
        let percent = saved / original_size as f64 * 100.0;
        (percent * 100.0).round() / 100.0
    }
}
