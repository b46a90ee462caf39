//! Job records and queue operation outcomes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediaq_models::{JobId, JobKind, JobState, RetryPolicy};

use crate::error::{QueueError, QueueResult};

/// Submission parameters of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Caller-assigned id; also the deduplication key
    pub job_id: JobId,
    /// Total attempts allowed, including the first
    pub attempts: u32,
    /// Base of the exponential retry backoff
    pub backoff_delay_ms: u64,
}

impl JobOptions {
    pub fn new(job_id: impl Into<JobId>, retry: RetryPolicy) -> Self {
        Self {
            job_id: job_id.into(),
            attempts: retry.attempts.max(1),
            backoff_delay_ms: retry.backoff_delay_ms,
        }
    }

    /// Options with the retry defaults of `kind`.
    pub fn for_kind(job_id: impl Into<JobId>, kind: JobKind) -> Self {
        Self::new(job_id, kind.default_retry())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, self.backoff_delay_ms)
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new record was created and is waiting
    Enqueued,
    /// A job with the same id is already waiting or active; nothing was added
    Duplicate,
}

/// What a failure did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job will run again after `delay`; `attempt` runs have failed so far
    Retrying { attempt: u32, delay: Duration },
    /// The job is terminally failed
    Failed,
}

/// Number of jobs per state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Waiting jobs still inside their retry backoff
    pub delayed: u64,
}

/// A job as stored by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Job name given at submission (the job kind for typed submissions)
    pub name: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub progress: u8,
    /// Failed runs so far
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_delay_ms: u64,
    pub result: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Start of the most recent run
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Fresh waiting record.
    pub fn new(name: &str, payload: serde_json::Value, options: &JobOptions) -> Self {
        Self {
            id: options.job_id.clone(),
            name: name.to_string(),
            payload,
            state: JobState::Waiting,
            progress: 0,
            attempts_made: 0,
            max_attempts: options.attempts,
            backoff_delay_ms: options.backoff_delay_ms,
            result: None,
            failure_reason: None,
            created_at: Utc::now(),
            processed_at: None,
            finished_at: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff_delay_ms)
    }

    /// 1-based number of the current run.
    pub fn attempt(&self) -> u32 {
        self.attempts_made + 1
    }

    /// Deserialize the `result` field.
    pub fn result_as<T: serde::de::DeserializeOwned>(&self) -> QueueResult<Option<T>> {
        self.result
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(QueueError::from)
    }

    /// Flatten into Redis hash fields.
    pub fn to_hash(&self) -> QueueResult<Vec<(&'static str, String)>> {
        let mut fields = vec![
            ("id", self.id.to_string()),
            ("name", self.name.clone()),
            ("payload", serde_json::to_string(&self.payload)?),
            ("state", self.state.to_string()),
            ("progress", self.progress.to_string()),
            ("attempts_made", self.attempts_made.to_string()),
            ("max_attempts", self.max_attempts.to_string()),
            ("backoff_delay_ms", self.backoff_delay_ms.to_string()),
            ("created_at", self.created_at.timestamp_millis().to_string()),
        ];
        if let Some(result) = &self.result {
            fields.push(("result", serde_json::to_string(result)?));
        }
        if let Some(reason) = &self.failure_reason {
            fields.push(("failure_reason", reason.clone()));
        }
        if let Some(t) = self.processed_at {
            fields.push(("processed_at", t.timestamp_millis().to_string()));
        }
        if let Some(t) = self.finished_at {
            fields.push(("finished_at", t.timestamp_millis().to_string()));
        }
        Ok(fields)
    }

    /// Rebuild from Redis hash fields.
    pub fn from_hash(fields: &HashMap<String, String>) -> QueueResult<Self> {
        let required = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| QueueError::invalid_record(format!("missing field {}", name)))
        };
        let number = |name: &str| -> QueueResult<u64> {
            required(name)?
                .parse()
                .map_err(|_| QueueError::invalid_record(format!("field {} is not a number", name)))
        };
        let timestamp = |name: &str| -> QueueResult<Option<DateTime<Utc>>> {
            match fields.get(name) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<i64>()
                    .ok()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map(Some)
                    .ok_or_else(|| {
                        QueueError::invalid_record(format!("field {} is not a timestamp", name))
                    }),
            }
        };

        let state = required("state")?
            .parse::<JobState>()
            .map_err(QueueError::invalid_record)?;
        let result = fields
            .get("result")
            .map(|raw| serde_json::from_str(raw))
            .transpose()?;

        Ok(Self {
            id: JobId::from_string(required("id")?.clone()),
            name: required("name")?.clone(),
            payload: serde_json::from_str(required("payload")?)?,
            state,
            progress: number("progress")?.min(100) as u8,
            attempts_made: number("attempts_made")? as u32,
            max_attempts: number("max_attempts")? as u32,
            backoff_delay_ms: number("backoff_delay_ms")?,
            result,
            failure_reason: fields.get("failure_reason").cloned(),
            created_at: timestamp("created_at")?.unwrap_or_default(),
            processed_at: timestamp("processed_at")?,
            finished_at: timestamp("finished_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_for_kind() {
        let opts = JobOptions::for_kind("sprite-1", JobKind::Sprite);
        assert_eq!(opts.job_id.as_str(), "sprite-1");
        assert_eq!(opts.attempts, 2);
        assert_eq!(opts.backoff_delay_ms, 5000);
    }

    #[test]
    fn test_options_require_one_attempt() {
        let opts = JobOptions::new("x", RetryPolicy::new(0, 10));
        assert_eq!(opts.attempts, 1);
    }

    #[test]
    fn test_record_hash_roundtrip() {
        let opts = JobOptions::for_kind("p-1", JobKind::Poster);
        let mut record = JobRecord::new("poster", serde_json::json!({"sourceKey": "a.jpg"}), &opts);
        record.state = JobState::Failed;
        record.attempts_made = 3;
        record.failure_reason = Some("Object not found: src/a.jpg".to_string());
        record.processed_at = Some(Utc::now());

        let fields: HashMap<String, String> = record
            .to_hash()
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let parsed = JobRecord::from_hash(&fields).unwrap();

        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.state, JobState::Failed);
        assert_eq!(parsed.attempts_made, 3);
        assert_eq!(parsed.max_attempts, 3);
        assert_eq!(parsed.payload, record.payload);
        assert_eq!(parsed.failure_reason, record.failure_reason);
        assert_eq!(
            parsed.processed_at.map(|t| t.timestamp_millis()),
            record.processed_at.map(|t| t.timestamp_millis())
        );
        assert!(parsed.result.is_none());
    }

    #[test]
    fn test_record_from_partial_hash() {
        let fields: HashMap<String, String> = [("id", "j"), ("state", "waiting")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(matches!(
            JobRecord::from_hash(&fields),
            Err(QueueError::InvalidRecord(_))
        ));
    }
}
