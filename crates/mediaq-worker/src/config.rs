//! Worker configuration.

use std::time::Duration;

use tracing::warn;

use mediaq_models::{ImageFormat, JobKind};

/// Output settings of poster variants.
///
/// Variants are always WebP so their keys keep the `.webp` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosterSettings {
    pub quality: u8,
}

impl PosterSettings {
    pub const FORMAT: ImageFormat = ImageFormat::Webp;
}

impl Default for PosterSettings {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

/// WebP qualities of sprite tiles and sheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteSettings {
    /// Quality of each resized thumbnail held between the two phases
    pub tile_quality: u8,
    /// Quality of the composited sheet
    pub sheet_quality: u8,
}

impl Default for SpriteSettings {
    fn default() -> Self {
        Self {
            tile_quality: 80,
            sheet_quality: 80,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent poster jobs
    pub poster_concurrency: usize,
    /// Concurrent sprite jobs
    pub sprite_concurrency: usize,
    /// Concurrent optimize jobs
    pub optimize_concurrency: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// How often to return jobs of crashed workers to the queue
    pub stalled_interval: Duration,
    /// Fail validation errors on the first attempt instead of retrying
    pub fail_fast_validation: bool,
    pub poster: PosterSettings,
    pub sprite: SpriteSettings,
    /// Port of the Prometheus endpoint; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poster_concurrency: 2,
            sprite_concurrency: 2,
            optimize_concurrency: 2,
            poll_interval: Duration::from_millis(500),
            stalled_interval: Duration::from_secs(30),
            fail_fast_validation: false,
            poster: PosterSettings::default(),
            sprite: SpriteSettings::default(),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poster_concurrency: env_parse("WORKER_POSTER_CONCURRENCY")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.poster_concurrency),
            sprite_concurrency: env_parse("WORKER_SPRITE_CONCURRENCY")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.sprite_concurrency),
            optimize_concurrency: env_parse("WORKER_OPTIMIZE_CONCURRENCY")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.optimize_concurrency),
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            stalled_interval: env_parse("WORKER_STALLED_INTERVAL_SECS")
                .filter(|&s: &u64| s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.stalled_interval),
            fail_fast_validation: std::env::var("WORKER_FAIL_FAST_VALIDATION")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.fail_fast_validation),
            poster: PosterSettings {
                quality: env_quality("POSTER_QUALITY").unwrap_or(defaults.poster.quality),
            },
            sprite: SpriteSettings {
                tile_quality: env_quality("SPRITE_TILE_QUALITY")
                    .unwrap_or(defaults.sprite.tile_quality),
                sheet_quality: env_quality("SPRITE_SHEET_QUALITY")
                    .unwrap_or(defaults.sprite.sheet_quality),
            },
            metrics_port: env_parse("METRICS_PORT"),
        }
    }

    /// Concurrency limit of the queue serving `kind`.
    pub fn concurrency(&self, kind: JobKind) -> usize {
        match kind {
            JobKind::Poster => self.poster_concurrency,
            JobKind::Sprite => self.sprite_concurrency,
            JobKind::Optimize => self.optimize_concurrency,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_quality(name: &str) -> Option<u8> {
    let quality = env_parse::<u8>(name)?;
    if (1..=100).contains(&quality) {
        Some(quality)
    } else {
        warn!("Ignoring {}={}: quality must be between 1 and 100", name, quality);
        None
    }
}
