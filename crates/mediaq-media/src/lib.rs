//! Image processing for derivative generation.
//!
//! This crate provides:
//! - Decoding source bytes (metadata is dropped on decode)
//! - Width-bounded resizing that never upscales
//! - Cover-fit thumbnails
//! - WebP / JPEG / PNG / AVIF encoding with per-format quality handling
//! - Sprite sheet planning and compositing
//!
//! Every function here is synchronous and CPU-bound; async callers should
//! run them on a blocking thread.

pub mod codec;
pub mod error;
pub mod resize;
pub mod sprite;

pub use codec::{decode, encode, EncodeOptions, WEBP_MAX_DIMENSION};
pub use error::{MediaError, MediaResult};
pub use resize::{cover_fit, resize_to_width, scaled_height};
pub use sprite::{compose_sheet, plan_sheets, tile_origin, SheetLayout};
