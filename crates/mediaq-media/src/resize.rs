//! Geometry-preserving resize operations.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::error::{MediaError, MediaResult};

/// Height matching `target_width` at the source aspect ratio, rounded half up.
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let w = width as u64;
    let numerator = 2 * height as u64 * target_width as u64 + w;
    ((numerator / (2 * w)) as u32).max(1)
}

/// Resize to `target_width`, keeping the aspect ratio.
///
/// A source that is already at most `target_width` wide keeps its native
/// size; images are never enlarged.
pub fn resize_to_width(img: &DynamicImage, target_width: u32) -> MediaResult<DynamicImage> {
    let (width, height) = img.dimensions();
    if target_width == 0 {
        return Err(MediaError::invalid_dimensions("target width must be positive"));
    }
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_dimensions(format!(
            "source is {}x{}",
            width, height
        )));
    }

    if width <= target_width {
        return Ok(img.clone());
    }

    let target_height = scaled_height(width, height, target_width);
    Ok(img.resize_exact(target_width, target_height, FilterType::Lanczos3))
}

/// Scale and center-crop to exactly `width` x `height` without distortion.
pub fn cover_fit(img: &DynamicImage, width: u32, height: u32) -> MediaResult<DynamicImage> {
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_dimensions(format!(
            "cover target is {}x{}",
            width, height
        )));
    }
    let (src_w, src_h) = img.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(MediaError::invalid_dimensions(format!(
            "source is {}x{}",
            src_w, src_h
        )));
    }

    let filled = img.resize_to_fill(width, height, FilterType::Lanczos3);
    // resize_to_fill can land one pixel short on extreme ratios
    if filled.dimensions() == (width, height) {
        Ok(filled)
    } else {
        Ok(filled.resize_exact(width, height, FilterType::Lanczos3))
    }
}
