//! Progress reporting from inside a handler.

use std::sync::Arc;

use tracing::debug;

use mediaq_models::JobId;
use mediaq_queue::JobQueue;

use crate::error::WorkerResult;

/// Writes progress of one job back to the queue.
#[derive(Clone)]
pub struct ProgressReporter {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(queue: Arc<dyn JobQueue>, queue_name: impl Into<String>, job_id: JobId) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            job_id,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Record `percent` on the job. A failed write fails the attempt.
    pub async fn report(&self, percent: u8) -> WorkerResult<()> {
        debug!(job_id = %self.job_id, "progress {}%", percent);
        self.queue
            .update_progress(&self.queue_name, &self.job_id, percent)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("queue_name", &self.queue_name)
            .field("job_id", &self.job_id)
            .finish()
    }
}

/// `round(done / total * span)`, rounding halves up.
pub fn percent(done: usize, total: usize, span: u8) -> u8 {
    if total == 0 {
        return span;
    }
    let done = done.min(total) as u64;
    let total = total as u64;
    let span = span as u64;
    ((2 * done * span + total) / (2 * total)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_queue::{JobOptions, MemoryJobQueue};
    use mediaq_models::JobKind;

    #[test]
    fn test_percent_rounds_half_up() {
        assert_eq!(percent(1, 3, 100), 33);
        assert_eq!(percent(2, 3, 100), 67);
        assert_eq!(percent(3, 3, 100), 100);
        // 1/8 * 100 = 12.5
        assert_eq!(percent(1, 8, 100), 13);
        // 1/4 * 50 = 12.5
        assert_eq!(percent(1, 4, 50), 13);
        assert_eq!(percent(13, 13, 50), 50);
    }

    #[test]
    fn test_percent_edges() {
        assert_eq!(percent(0, 5, 100), 0);
        assert_eq!(percent(0, 0, 50), 50);
        assert_eq!(percent(9, 3, 100), 100);
    }

    #[tokio::test]
    async fn test_report_writes_to_queue() {
        let queue = Arc::new(MemoryJobQueue::default());
        let id = JobId::from("opt-1");
        queue
            .enqueue(
                "optimize",
                "optimize",
                serde_json::json!({}),
                JobOptions::for_kind(id.clone(), JobKind::Optimize),
            )
            .await
            .unwrap();
        queue.next_job("optimize").await.unwrap().unwrap();

        let reporter = ProgressReporter::new(queue.clone(), "optimize", id.clone());
        reporter.report(10).await.unwrap();
        reporter.report(40).await.unwrap();

        assert_eq!(queue.progress_history("optimize", &id).await, vec![10, 40]);
        let job = queue.get_job("optimize", &id).await.unwrap().unwrap();
        assert_eq!(job.progress, 40);
    }
}
