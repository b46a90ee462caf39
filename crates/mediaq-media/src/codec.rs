//! Decoding and format-specific encoding.
//!
//! Decoding produces bare pixels: EXIF, ICC and XMP blocks from the source
//! are never carried into the encoded output.

use std::ops::Deref;

use image::codecs::avif::AvifEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{ColorType, DynamicImage, GenericImageView, ImageEncoder};
use mediaq_models::ImageFormat;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Largest width or height libwebp accepts.
pub const WEBP_MAX_DIMENSION: u32 = 16383;

/// AVIF encoder speed (1 slowest / smallest, 10 fastest).
const AVIF_SPEED: u8 = 6;

/// Target encoding of one output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: ImageFormat,
    /// 1-100; ignored by PNG
    pub quality: u8,
}

impl EncodeOptions {
    pub fn new(format: ImageFormat, quality: u8) -> Self {
        Self {
            format,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn webp(quality: u8) -> Self {
        Self::new(ImageFormat::Webp, quality)
    }
}

/// Decode an encoded image of any supported container.
pub fn decode(bytes: &[u8]) -> MediaResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(MediaError::decode_failed("source is empty"));
    }
    image::load_from_memory(bytes).map_err(|e| MediaError::decode_failed(e.to_string()))
}

/// Encode `img` according to `opts`.
pub fn encode(img: &DynamicImage, opts: EncodeOptions) -> MediaResult<Vec<u8>> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_dimensions(format!(
            "cannot encode {}x{} image",
            width, height
        )));
    }

    let bytes = match opts.format {
        ImageFormat::Webp => encode_webp(img, opts.quality)?,
        ImageFormat::Jpeg => encode_jpeg(img, opts.quality)?,
        ImageFormat::Png => encode_png(img)?,
        ImageFormat::Avif => encode_avif(img, opts.quality)?,
    };

    debug!(
        "Encoded {}x{} {} ({} bytes, quality {})",
        width,
        height,
        opts.format,
        bytes.len(),
        opts.quality
    );
    Ok(bytes)
}

fn encode_webp(img: &DynamicImage, quality: u8) -> MediaResult<Vec<u8>> {
    let (width, height) = img.dimensions();
    if width > WEBP_MAX_DIMENSION || height > WEBP_MAX_DIMENSION {
        return Err(MediaError::invalid_dimensions(format!(
            "{}x{} exceeds the WebP limit of {} pixels per side",
            width, height, WEBP_MAX_DIMENSION
        )));
    }

    // The webp encoder only takes 8-bit RGB or RGBA buffers.
    let normalized = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };

    let encoder = webp::Encoder::from_image(&normalized)
        .map_err(|reason| MediaError::encode_failed("webp", reason))?;

    // `WebPMemory` is !Send, copy it out before returning.
    Ok(encoder.encode(quality as f32).deref().to_vec())
}

/// Maximum-compression JPEG: optimized Huffman tables over progressive scans.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> MediaResult<Vec<u8>> {
    let (width, height) = img.dimensions();
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(MediaError::invalid_dimensions(format!(
            "{}x{} exceeds the JPEG limit of {} pixels per side",
            width,
            height,
            u16::MAX
        )));
    };

    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut buf, quality);
    encoder.set_optimized_huffman_tables(true);
    encoder.set_progressive(true);
    encoder
        .encode(rgb.as_raw(), w, h, jpeg_encoder::ColorType::Rgb)
        .map_err(|e| MediaError::encode_failed("jpeg", e.to_string()))?;
    Ok(buf)
}

fn encode_png(img: &DynamicImage) -> MediaResult<Vec<u8>> {
    let rgba = img.to_rgba8();
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive)
        .write_image(rgba.as_raw(), rgba.width(), rgba.height(), ColorType::Rgba8)
        .map_err(|e| MediaError::encode_failed("png", e.to_string()))?;
    Ok(buf)
}

fn encode_avif(img: &DynamicImage, quality: u8) -> MediaResult<Vec<u8>> {
    let rgba = img.to_rgba8();
    let mut buf = Vec::new();
    AvifEncoder::new_with_speed_quality(&mut buf, AVIF_SPEED, quality)
        .write_image(rgba.as_raw(), rgba.width(), rgba.height(), ColorType::Rgba8)
        .map_err(|e| MediaError::encode_failed("avif", e.to_string()))?;
    Ok(buf)
}
