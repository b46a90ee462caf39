//! In-process job queue.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use mediaq_models::{JobId, JobState};

use crate::error::{QueueError, QueueResult};
use crate::job::{EnqueueOutcome, FailureOutcome, JobCounts, JobOptions, JobRecord};
use crate::queue::{JobQueue, QueueConfig};

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, JobRecord>,
    wait: VecDeque<JobId>,
    /// Retries waiting out their backoff, with their ready time
    delayed: Vec<(Instant, JobId)>,
    /// Active jobs with their lease expiry
    active: HashMap<JobId, Instant>,
    /// Newest first
    completed: VecDeque<JobId>,
    /// Newest first
    failed: VecDeque<JobId>,
    progress_history: HashMap<JobId, Vec<u8>>,
}

impl QueueState {
    fn job_mut(&mut self, id: &JobId) -> QueueResult<&mut JobRecord> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(ready, _)| *ready);
        let due = self.delayed.partition_point(|(ready, _)| *ready <= now);
        for (_, id) in self.delayed.drain(..due) {
            self.wait.push_back(id);
        }
    }

    fn evict(
        list: &mut VecDeque<JobId>,
        keep: usize,
        jobs: &mut HashMap<JobId, JobRecord>,
        history: &mut HashMap<JobId, Vec<u8>>,
    ) {
        while list.len() > keep {
            if let Some(old) = list.pop_back() {
                jobs.remove(&old);
                history.remove(&old);
            }
        }
    }
}

/// Job queue held in memory with the same semantics as
/// [`crate::RedisJobQueue`].
///
/// Backoff and lease deadlines use the tokio clock, so tests running with a
/// paused clock control retries and stalls deterministically.
#[derive(Debug)]
pub struct MemoryJobQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    keep_completed: usize,
    keep_failed: usize,
    lock_ttl: Duration,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

impl MemoryJobQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
            lock_ttl: config.lock_ttl,
        }
    }

    /// Every progress value reported for a job, in order.
    pub async fn progress_history(&self, queue: &str, id: &JobId) -> Vec<u8> {
        self.queues
            .lock()
            .await
            .get(queue)
            .and_then(|q| q.progress_history.get(id).cloned())
            .unwrap_or_default()
    }

    /// Ids currently retained in the completed list, newest first.
    pub async fn completed_ids(&self, queue: &str) -> Vec<JobId> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.completed.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<EnqueueOutcome> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let id = options.job_id.clone();

        if let Some(existing) = state.jobs.get(&id) {
            if existing.state.is_pending() {
                debug!("Job {} already {} in {}", id, existing.state, queue);
                return Ok(EnqueueOutcome::Duplicate);
            }
            state.completed.retain(|j| j != &id);
            state.failed.retain(|j| j != &id);
            state.progress_history.remove(&id);
        }

        state
            .jobs
            .insert(id.clone(), JobRecord::new(name, payload, &options));
        state.wait.push_back(id);
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn next_job(&self, queue: &str) -> QueueResult<Option<JobRecord>> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Instant::now();
        state.promote_due(now);

        while let Some(id) = state.wait.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.state = JobState::Active;
            job.processed_at = Some(Utc::now());
            let record = job.clone();
            state.active.insert(id, now + self.lock_ttl);
            return Ok(Some(record));
        }
        Ok(None)
    }

    async fn update_progress(&self, queue: &str, id: &JobId, percent: u8) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        let percent = percent.min(100);
        state.job_mut(id)?.progress = percent;
        state
            .progress_history
            .entry(id.clone())
            .or_default()
            .push(percent);
        Ok(())
    }

    async fn complete(
        &self,
        queue: &str,
        id: &JobId,
        result: serde_json::Value,
    ) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        if state.active.remove(id).is_none() {
            return Err(QueueError::JobNotActive(id.to_string()));
        }
        let job = state.job_mut(id)?;
        job.state = JobState::Completed;
        job.result = Some(result);
        job.finished_at = Some(Utc::now());

        state.completed.push_front(id.clone());
        QueueState::evict(
            &mut state.completed,
            self.keep_completed,
            &mut state.jobs,
            &mut state.progress_history,
        );
        Ok(())
    }

    async fn fail(
        &self,
        queue: &str,
        id: &JobId,
        reason: &str,
        retryable: bool,
    ) -> QueueResult<FailureOutcome> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        if state.active.remove(id).is_none() {
            return Err(QueueError::JobNotActive(id.to_string()));
        }
        let job = state.job_mut(id)?;
        job.attempts_made += 1;
        job.failure_reason = Some(reason.to_string());

        if retryable && job.attempts_made < job.max_attempts {
            let attempt = job.attempts_made;
            let delay = job.retry_policy().delay_for_attempt(attempt);
            job.state = JobState::Waiting;
            state.delayed.push((Instant::now() + delay, id.clone()));
            return Ok(FailureOutcome::Retrying { attempt, delay });
        }

        job.state = JobState::Failed;
        job.finished_at = Some(Utc::now());
        state.failed.push_front(id.clone());
        QueueState::evict(
            &mut state.failed,
            self.keep_failed,
            &mut state.jobs,
            &mut state.progress_history,
        );
        Ok(FailureOutcome::Failed)
    }

    async fn extend_lock(&self, queue: &str, id: &JobId) -> QueueResult<bool> {
        let mut queues = self.queues.lock().await;
        let Some(lease) = queues.get_mut(queue).and_then(|q| q.active.get_mut(id)) else {
            return Ok(false);
        };
        *lease = Instant::now() + self.lock_ttl;
        Ok(true)
    }

    async fn recover_stalled(&self, queue: &str) -> QueueResult<u32> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(0);
        };

        let now = Instant::now();
        let stalled: Vec<JobId> = state
            .active
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stalled {
            state.active.remove(id);
            if let Some(job) = state.jobs.get_mut(id) {
                job.state = JobState::Waiting;
            }
            state.wait.push_front(id.clone());
        }
        Ok(stalled.len() as u32)
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .and_then(|q| q.jobs.get(id).cloned()))
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|q| JobCounts {
                waiting: q.wait.len() as u64,
                active: q.active.len() as u64,
                completed: q.completed.len() as u64,
                failed: q.failed.len() as u64,
                delayed: q.delayed.len() as u64,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_models::{JobKind, RetryPolicy};
    use serde_json::json;

    const Q: &str = "poster";

    async fn enqueue(queue: &MemoryJobQueue, id: &str, retry: RetryPolicy) -> EnqueueOutcome {
        queue
            .enqueue(Q, Q, json!({"n": id}), JobOptions::new(id, retry))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryJobQueue::default();
        for id in ["a", "b", "c"] {
            enqueue(&queue, id, JobKind::Poster.default_retry()).await;
        }
        for id in ["a", "b", "c"] {
            let job = queue.next_job(Q).await.unwrap().unwrap();
            assert_eq!(job.id.as_str(), id);
            assert_eq!(job.state, JobState::Active);
            assert!(job.processed_at.is_some());
        }
        assert!(queue.next_job(Q).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_while_waiting_or_active_is_coalesced() {
        let queue = MemoryJobQueue::default();
        let retry = JobKind::Poster.default_retry();

        assert_eq!(enqueue(&queue, "dup", retry).await, EnqueueOutcome::Enqueued);
        assert_eq!(enqueue(&queue, "dup", retry).await, EnqueueOutcome::Duplicate);

        let job = queue.next_job(Q).await.unwrap().unwrap();
        assert_eq!(enqueue(&queue, "dup", retry).await, EnqueueOutcome::Duplicate);
        assert!(queue.next_job(Q).await.unwrap().is_none());

        queue.complete(Q, &job.id, json!({})).await.unwrap();
        // a finished id may be submitted again
        assert_eq!(enqueue(&queue, "dup", retry).await, EnqueueOutcome::Enqueued);
        let counts = queue.counts(Q).await.unwrap();
        assert_eq!((counts.waiting, counts.completed), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_then_terminal_failure() {
        let queue = MemoryJobQueue::default();
        enqueue(&queue, "r", RetryPolicy::new(3, 3000)).await;
        let id = JobId::from("r");

        queue.next_job(Q).await.unwrap().unwrap();
        let outcome = queue.fail(Q, &id, "boom 1", true).await.unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_millis(3000)
            }
        );
        assert_eq!(queue.counts(Q).await.unwrap().delayed, 1);

        // not ready before the backoff elapses
        tokio::time::advance(Duration::from_millis(2999)).await;
        assert!(queue.next_job(Q).await.unwrap().is_none());
        tokio::time::advance(Duration::from_millis(1)).await;
        let job = queue.next_job(Q).await.unwrap().unwrap();
        assert_eq!(job.attempt(), 2);

        let outcome = queue.fail(Q, &id, "boom 2", true).await.unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                attempt: 2,
                delay: Duration::from_millis(6000)
            }
        );
        tokio::time::advance(Duration::from_millis(6000)).await;
        queue.next_job(Q).await.unwrap().unwrap();

        let outcome = queue.fail(Q, &id, "boom 3", true).await.unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);

        let job = queue.get_job(Q, &id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.failure_reason.as_deref(), Some("boom 3"));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_terminal() {
        let queue = MemoryJobQueue::default();
        enqueue(&queue, "v", RetryPolicy::new(3, 3000)).await;
        queue.next_job(Q).await.unwrap();

        let outcome = queue
            .fail(Q, &JobId::from("v"), "sourceBucket and sourceKey are required", false)
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);
        assert_eq!(queue.counts(Q).await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest() {
        let config = QueueConfig {
            keep_completed: 2,
            keep_failed: 1,
            ..QueueConfig::default()
        };
        let queue = MemoryJobQueue::new(&config);

        for id in ["c1", "c2", "c3"] {
            enqueue(&queue, id, RetryPolicy::new(1, 0)).await;
            let job = queue.next_job(Q).await.unwrap().unwrap();
            queue.complete(Q, &job.id, json!({"id": id})).await.unwrap();
        }
        for id in ["f1", "f2"] {
            enqueue(&queue, id, RetryPolicy::new(1, 0)).await;
            let job = queue.next_job(Q).await.unwrap().unwrap();
            queue.fail(Q, &job.id, "nope", true).await.unwrap();
        }

        assert_eq!(
            queue.completed_ids(Q).await,
            vec![JobId::from("c3"), JobId::from("c2")]
        );
        assert!(queue.get_job(Q, &JobId::from("c1")).await.unwrap().is_none());
        assert!(queue.get_job(Q, &JobId::from("f1")).await.unwrap().is_none());
        assert!(queue.get_job(Q, &JobId::from("f2")).await.unwrap().is_some());

        let counts = queue.counts(Q).await.unwrap();
        assert_eq!((counts.completed, counts.failed), (2, 1));
    }

    #[tokio::test]
    async fn test_progress_is_clamped_and_recorded() {
        let queue = MemoryJobQueue::default();
        enqueue(&queue, "p", RetryPolicy::new(1, 0)).await;
        let id = JobId::from("p");
        queue.next_job(Q).await.unwrap();

        for p in [10, 40, 200] {
            queue.update_progress(Q, &id, p).await.unwrap();
        }
        assert_eq!(queue.progress_history(Q, &id).await, vec![10, 40, 100]);
        assert_eq!(queue.get_job(Q, &id).await.unwrap().unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_complete_requires_active_job() {
        let queue = MemoryJobQueue::default();
        enqueue(&queue, "w", RetryPolicy::new(1, 0)).await;
        let err = queue
            .complete(Q, &JobId::from("w"), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::JobNotActive(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_job_is_recovered_without_using_an_attempt() {
        let queue = MemoryJobQueue::default();
        enqueue(&queue, "s", RetryPolicy::new(2, 5000)).await;
        let id = JobId::from("s");
        queue.next_job(Q).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(queue.extend_lock(Q, &id).await.unwrap());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(queue.recover_stalled(Q).await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(queue.recover_stalled(Q).await.unwrap(), 1);
        assert!(!queue.extend_lock(Q, &id).await.unwrap());

        let job = queue.next_job(Q).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts_made, 0);
    }
}
