//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while decoding, transforming or encoding images.
///
/// None of these are expected to succeed on retry: the source bytes or
/// requested geometry are the problem.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Failed to encode {format}: {message}")]
    EncodeFailed { format: String, message: String },

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn decode_failed(msg: impl Into<String>) -> Self {
        Self::DecodeFailed(msg.into())
    }

    pub fn encode_failed(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn invalid_dimensions(msg: impl Into<String>) -> Self {
        Self::InvalidDimensions(msg.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
