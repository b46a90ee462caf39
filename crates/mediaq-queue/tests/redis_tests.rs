//! Redis job queue integration tests.

use std::time::Duration;

use mediaq_models::{JobId, JobKind, JobState, PosterJob, RetryPolicy};
use mediaq_queue::{
    submit, EnqueueOutcome, FailureOutcome, JobOptions, JobQueue, QueueConfig, RedisJobQueue,
};

/// Each test gets its own key prefix so runs never see each other's jobs.
async fn test_queue(keep_completed: usize, keep_failed: usize) -> RedisJobQueue {
    dotenvy::dotenv().ok();

    let config = QueueConfig {
        prefix: format!("mediaq-test-{}", JobId::new()),
        keep_completed,
        keep_failed,
        ..QueueConfig::from_env()
    };
    RedisJobQueue::new(config)
        .await
        .expect("Failed to connect to Redis")
}

/// Test Redis connection.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_ping() {
    let queue = test_queue(200, 100).await;
    queue.ping().await.expect("Failed to ping");
}

/// Enqueue, take, complete.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_next_complete() {
    let queue = test_queue(200, 100).await;
    let job = PosterJob::new("media", "a.jpg", "derived", "a/");

    let outcome = submit(&queue, "poster-1", &job).await.expect("Failed to submit");
    assert_eq!(outcome, EnqueueOutcome::Enqueued);

    let record = queue
        .next_job("poster")
        .await
        .expect("Failed to dequeue")
        .expect("job should be waiting");
    assert_eq!(record.id.as_str(), "poster-1");
    assert_eq!(record.state, JobState::Active);
    assert_eq!(record.max_attempts, 3);

    queue
        .update_progress("poster", &record.id, 33)
        .await
        .expect("Failed to update progress");
    queue
        .complete("poster", &record.id, serde_json::json!([{"size": 100}]))
        .await
        .expect("Failed to complete");

    let stored = queue
        .get_job("poster", &record.id)
        .await
        .expect("Failed to load job")
        .expect("job should be retained");
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(stored.progress, 33);
    let result: Option<Vec<serde_json::Value>> = stored.result_as().expect("Bad result");
    assert_eq!(result, Some(vec![serde_json::json!({"size": 100})]));
}

/// Progress writes are published to subscribers.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_events() {
    use futures::StreamExt;

    let queue = test_queue(200, 100).await;
    let job = PosterJob::new("media", "b.jpg", "derived", "b/");
    submit(&queue, "poster-events", &job).await.expect("Failed to submit");
    let record = queue.next_job("poster").await.unwrap().expect("job");

    let mut events = queue
        .subscribe_progress("poster", &record.id)
        .await
        .expect("Failed to subscribe");
    queue
        .update_progress("poster", &record.id, 67)
        .await
        .expect("Failed to update progress");

    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("no progress event")
        .expect("stream closed");
    assert_eq!(event.job_id, record.id);
    assert_eq!(event.queue, "poster");
    assert_eq!(event.progress, 67);
}

/// A pending id is coalesced.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_job_id() {
    let queue = test_queue(200, 100).await;
    let payload = serde_json::json!({"n": 1});
    let options = JobOptions::for_kind("dup", JobKind::Sprite);

    let first = queue
        .enqueue("sprite", "sprite", payload.clone(), options.clone())
        .await
        .expect("Failed to enqueue");
    let second = queue
        .enqueue("sprite", "sprite", payload, options)
        .await
        .expect("Failed to enqueue");

    assert_eq!(first, EnqueueOutcome::Enqueued);
    assert_eq!(second, EnqueueOutcome::Duplicate);
    assert_eq!(queue.counts("sprite").await.unwrap().waiting, 1);
}

/// Failures back off, then go terminal.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_and_terminal_failure() {
    let queue = test_queue(200, 100).await;
    let id = JobId::from("flaky");
    queue
        .enqueue(
            "optimize",
            "optimize",
            serde_json::json!({}),
            JobOptions::new(id.clone(), RetryPolicy::new(2, 200)),
        )
        .await
        .expect("Failed to enqueue");

    queue.next_job("optimize").await.unwrap().expect("job");
    let outcome = queue.fail("optimize", &id, "boom", true).await.unwrap();
    assert_eq!(
        outcome,
        FailureOutcome::Retrying {
            attempt: 1,
            delay: Duration::from_millis(200)
        }
    );
    assert!(queue.next_job("optimize").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(250)).await;
    queue.next_job("optimize").await.unwrap().expect("retry");
    let outcome = queue.fail("optimize", &id, "boom again", true).await.unwrap();
    assert_eq!(outcome, FailureOutcome::Failed);

    let counts = queue.counts("optimize").await.unwrap();
    assert_eq!((counts.failed, counts.delayed, counts.active), (1, 0, 0));
}

/// Only the newest completed records are kept.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_completed_retention() {
    let queue = test_queue(2, 1).await;
    for n in 0..4 {
        let options = JobOptions::new(format!("job-{}", n), RetryPolicy::new(1, 0));
        queue
            .enqueue("poster", "poster", serde_json::json!({}), options)
            .await
            .unwrap();
        let record = queue.next_job("poster").await.unwrap().unwrap();
        queue
            .complete("poster", &record.id, serde_json::json!(n))
            .await
            .unwrap();
    }

    assert_eq!(queue.counts("poster").await.unwrap().completed, 2);
    assert!(queue
        .get_job("poster", &JobId::from("job-0"))
        .await
        .unwrap()
        .is_none());
    assert!(queue
        .get_job("poster", &JobId::from("job-3"))
        .await
        .unwrap()
        .is_some());
}
