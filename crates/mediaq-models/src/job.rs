//! Job identity, kind and lifecycle state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-assigned job identifier.
///
/// The id doubles as the idempotency key: the queue coalesces a second
/// submission of an id that is still waiting or active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Retry parameters attached to a job at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one.
    pub attempts: u32,
    /// Base delay of the exponential backoff.
    pub backoff_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, backoff_delay_ms: u64) -> Self {
        Self {
            attempts,
            backoff_delay_ms,
        }
    }

    /// Delay before re-running a job whose `attempt`-th run (1-based) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        Duration::from_millis(self.backoff_delay_ms.saturating_mul(1u64 << exponent))
    }
}

/// The three derivative job types. Each one is served by its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Resized width variants of a poster image
    Poster,
    /// Thumbnail grid sprite sheets
    Sprite,
    /// Single image re-encode
    Optimize,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Poster, JobKind::Sprite, JobKind::Optimize];

    /// Queue (and job) name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Poster => "poster",
            JobKind::Sprite => "sprite",
            JobKind::Optimize => "optimize",
        }
    }

    /// Submission defaults used when the caller does not override them.
    pub fn default_retry(&self) -> RetryPolicy {
        match self {
            JobKind::Poster | JobKind::Optimize => RetryPolicy::new(3, 3000),
            JobKind::Sprite => RetryPolicy::new(2, 5000),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poster" => Ok(JobKind::Poster),
            "sprite" => Ok(JobKind::Sprite),
            "optimize" => Ok(JobKind::Optimize),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

/// Job state in the queue.
///
/// A job waiting out a retry backoff is `Waiting` with a not-before time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue
    #[default]
    Waiting,
    /// Job is held by a worker
    Active,
    /// Handler returned a result
    Completed,
    /// Attempts exhausted (or failure was not retryable)
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Waiting and active jobs reject a duplicate submission of their id.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Waiting | JobState::Active)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}
