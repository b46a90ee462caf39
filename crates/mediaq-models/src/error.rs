//! Payload validation errors.

use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// A job payload that can never succeed as submitted.
///
/// The message is surfaced verbatim as the job's failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}
