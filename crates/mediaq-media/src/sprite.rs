//! Sprite sheet planning and compositing.
//!
//! Tiles are laid out row-major on a grid of `cols` columns. A sheet holds
//! at most `cols * rows` tiles; the last sheet of a job may be partial.
//!
//! Width policy for a sheet with `tile_count` tiles:
//! - more than one row used: the canvas spans all `cols` columns, even when
//!   the last row is only partly filled;
//! - a single row used: the canvas is exactly `tile_count` columns wide.

use image::{imageops, DynamicImage, GenericImageView, Rgba, RgbaImage};

use crate::error::{MediaError, MediaResult};

/// Placement of one sheet within a job's ordered tile list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    pub sheet_index: u32,
    /// Index of the first tile (0-based into the job's input list)
    pub start_index: usize,
    pub tile_count: usize,
    /// Columns in the canvas
    pub grid_width: u32,
    /// Rows in the canvas
    pub grid_height: u32,
}

impl SheetLayout {
    /// Index of the last tile, inclusive.
    pub fn end_index(&self) -> usize {
        self.start_index + self.tile_count - 1
    }

    /// Canvas size in pixels, `None` when a side overflows `u32`.
    pub fn canvas_size(&self, thumb_width: u32, thumb_height: u32) -> Option<(u32, u32)> {
        Some((
            self.grid_width.checked_mul(thumb_width)?,
            self.grid_height.checked_mul(thumb_height)?,
        ))
    }
}

/// Partition `image_count` tiles into sheets of `cols * rows`.
pub fn plan_sheets(image_count: usize, cols: u32, rows: u32) -> Vec<SheetLayout> {
    if image_count == 0 || cols == 0 || rows == 0 {
        return Vec::new();
    }

    let per_sheet = cols as usize * rows as usize;
    let sheet_count = image_count.div_ceil(per_sheet);

    (0..sheet_count)
        .map(|sheet| {
            let start_index = sheet * per_sheet;
            let tile_count = per_sheet.min(image_count - start_index);
            let rows_in_sheet = tile_count.div_ceil(cols as usize) as u32;
            let grid_width = if rows_in_sheet > 1 {
                cols
            } else {
                tile_count as u32
            };

            SheetLayout {
                sheet_index: sheet as u32,
                start_index,
                tile_count,
                grid_width,
                grid_height: rows_in_sheet,
            }
        })
        .collect()
}

/// Pixel offset of tile `idx` (relative to its sheet).
///
/// Offsets saturate at `u32::MAX`; `compose_sheet` only asks for tiles
/// inside a canvas whose size has already been checked.
pub fn tile_origin(idx: usize, cols: u32, thumb_width: u32, thumb_height: u32) -> (u32, u32) {
    let cols = cols.max(1) as usize;
    let col = u32::try_from(idx % cols).unwrap_or(u32::MAX);
    let row = u32::try_from(idx / cols).unwrap_or(u32::MAX);
    (
        col.saturating_mul(thumb_width),
        row.saturating_mul(thumb_height),
    )
}

/// Composite `tiles` onto an opaque black canvas sized for `layout`.
///
/// Tiles with transparency are flattened against the black background.
pub fn compose_sheet(
    tiles: &[DynamicImage],
    layout: &SheetLayout,
    cols: u32,
    thumb_width: u32,
    thumb_height: u32,
) -> MediaResult<DynamicImage> {
    if tiles.len() != layout.tile_count {
        return Err(MediaError::internal(format!(
            "sheet {} expects {} tiles, got {}",
            layout.sheet_index,
            layout.tile_count,
            tiles.len()
        )));
    }

    let (canvas_w, canvas_h) = layout
        .canvas_size(thumb_width, thumb_height)
        .ok_or_else(|| {
            MediaError::invalid_dimensions(format!(
                "{}x{} grid of {}x{} tiles overflows the canvas",
                layout.grid_width, layout.grid_height, thumb_width, thumb_height
            ))
        })?;
    let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([0, 0, 0, 255]));

    for (idx, tile) in tiles.iter().enumerate() {
        if tile.dimensions() != (thumb_width, thumb_height) {
            return Err(MediaError::invalid_dimensions(format!(
                "tile {} is {}x{}, expected {}x{}",
                layout.start_index + idx,
                tile.width(),
                tile.height(),
                thumb_width,
                thumb_height
            )));
        }
        let (x, y) = tile_origin(idx, cols, thumb_width, thumb_height);
        imageops::overlay(&mut canvas, &tile.to_rgba8(), x as i64, y as i64);
    }

    Ok(DynamicImage::ImageRgb8(
        DynamicImage::ImageRgba8(canvas).to_rgb8(),
    ))
}
