//! Progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediaq_models::JobId;

/// Progress update published whenever a handler reports progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub queue: String,
    /// 0-100
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(queue: &str, job_id: &JobId, progress: u8) -> Self {
        Self {
            job_id: job_id.clone(),
            queue: queue.to_string(),
            progress: progress.min(100),
            timestamp: Utc::now(),
        }
    }

    /// Pub/Sub channel carrying the events of one job.
    pub fn channel_name(prefix: &str, queue: &str, job_id: &JobId) -> String {
        format!("{}:progress:{}:{}", prefix, queue, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(
            ProgressEvent::channel_name("mediaq", "sprite", &JobId::from("s-1")),
            "mediaq:progress:sprite:s-1"
        );
    }

    #[test]
    fn test_progress_is_clamped() {
        let event = ProgressEvent::new("poster", &JobId::from("p"), 250);
        assert_eq!(event.progress, 100);
    }
}
