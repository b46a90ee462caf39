//! Queue workers and the runtime that drives them.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use mediaq_models::{JobId, JobKind};
use mediaq_queue::{FailureOutcome, JobQueue, JobRecord};
use mediaq_storage::ObjectStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handlers::{JobHandler, OptimizeHandler, PosterHandler, SpriteHandler};
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::ProgressReporter;
use crate::retry::FailureTracker;

/// Consecutive poll errors logged before going quiet.
const MAX_LOGGED_POLL_FAILURES: u32 = 3;

/// Settings of one queue worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Jobs run at the same time
    pub concurrency: usize,
    /// Sleep after finding the queue empty
    pub poll_interval: Duration,
    /// Period of stalled-job recovery
    pub stalled_interval: Duration,
    /// Period of lease renewal while a handler runs
    pub heartbeat_interval: Duration,
    /// Do not retry validation failures
    pub fail_fast_validation: bool,
}

impl WorkerSettings {
    /// Settings of the `kind` worker. Leases are renewed at half their TTL.
    pub fn from_config(config: &WorkerConfig, kind: JobKind, lock_ttl: Duration) -> Self {
        Self {
            concurrency: config.concurrency(kind).max(1),
            poll_interval: config.poll_interval,
            stalled_interval: config.stalled_interval,
            heartbeat_interval: (lock_ttl / 2).max(Duration::from_millis(100)),
            fail_fast_validation: config.fail_fast_validation,
        }
    }
}

/// Pulls jobs from one queue and runs them with bounded concurrency.
pub struct QueueWorker {
    handler: Arc<dyn JobHandler>,
    queue: Arc<dyn JobQueue>,
    settings: WorkerSettings,
    semaphore: Arc<Semaphore>,
}

impl QueueWorker {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        queue: Arc<dyn JobQueue>,
        settings: WorkerSettings,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.concurrency));
        Self {
            handler,
            queue,
            settings,
            semaphore,
        }
    }

    pub fn queue_name(&self) -> &'static str {
        self.handler.kind().as_str()
    }

    /// Run until `shutdown` turns true (or its sender is dropped), then wait
    /// for every in-flight job to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let name = self.queue_name();
        info!(
            "Starting {} worker with {} concurrent jobs",
            name, self.settings.concurrency
        );

        let maintenance = tokio::spawn(maintenance_loop(
            Arc::clone(&self.queue),
            name,
            self.settings.stalled_interval,
            shutdown.clone(),
        ));

        let mut failures = FailureTracker::new(MAX_LOGGED_POLL_FAILURES);
        loop {
            // Take a slot before dequeuing so a job is never held without one.
            let permit = tokio::select! {
                biased;
                _ = shutdown_signal(&mut shutdown) => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    permit.map_err(|e| WorkerError::Join(e.to_string()))?
                }
            };

            let idle = match self.queue.next_job(name).await {
                Ok(Some(job)) => {
                    failures.record_success();
                    let handler = Arc::clone(&self.handler);
                    let queue = Arc::clone(&self.queue);
                    let settings = self.settings.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        execute_job(handler, queue, settings, job).await;
                    });
                    continue;
                }
                Ok(None) => {
                    failures.record_success();
                    self.settings.poll_interval
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!("Failed to poll {} queue: {}", name, e);
                    }
                    let exp = failures.failure_count().min(4);
                    self.settings
                        .poll_interval
                        .max(Duration::from_millis(100))
                        .saturating_mul(1 << exp)
                }
            };
            drop(permit);

            tokio::select! {
                biased;
                _ = shutdown_signal(&mut shutdown) => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }

        maintenance.abort();

        info!("Stopping {} worker, waiting for in-flight jobs", name);
        let _drained = self
            .semaphore
            .acquire_many(self.settings.concurrency as u32)
            .await
            .map_err(|e| WorkerError::Join(e.to_string()))?;
        info!("{} worker stopped", name);
        Ok(())
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Periodic stalled-job recovery and queue depth gauges.
async fn maintenance_loop(
    queue: Arc<dyn JobQueue>,
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = FailureTracker::new(MAX_LOGGED_POLL_FAILURES);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_signal(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        match queue.recover_stalled(name).await {
            Ok(0) => failures.record_success(),
            Ok(n) => {
                failures.record_success();
                warn!("Returned {} stalled jobs to the {} queue", n, name);
            }
            Err(e) => {
                if failures.record_failure() {
                    warn!("Failed to recover stalled {} jobs: {}", name, e);
                }
            }
        }

        if let Ok(counts) = queue.counts(name).await {
            metrics::set_queue_counts(name, &counts);
        }
    }
}

/// Renew the job's lease until aborted or the job is no longer active.
async fn heartbeat(queue: Arc<dyn JobQueue>, name: &'static str, id: JobId, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match queue.extend_lock(name, &id).await {
            Ok(true) => debug!(job_id = %id, "lease renewed"),
            Ok(false) => {
                warn!(job_id = %id, "lease lost, job is no longer active");
                return;
            }
            Err(e) => warn!(job_id = %id, "Failed to renew lease: {}", e),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one attempt of `job` and hand the outcome to the queue.
async fn execute_job(
    handler: Arc<dyn JobHandler>,
    queue: Arc<dyn JobQueue>,
    settings: WorkerSettings,
    job: JobRecord,
) {
    let name = handler.kind().as_str();
    let logger = JobLogger::new(&job.id, name);
    let span = logger.create_span();

    async move {
        logger.log_start(&format!("attempt {}/{}", job.attempt(), job.max_attempts));
        metrics::record_job_started(name);
        let started = Instant::now();

        let lease = tokio::spawn(heartbeat(
            Arc::clone(&queue),
            name,
            job.id.clone(),
            settings.heartbeat_interval,
        ));
        let reporter = ProgressReporter::new(Arc::clone(&queue), name, job.id.clone());

        let outcome = AssertUnwindSafe(handler.handle(&job, &reporter))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(&*panic))));
        lease.abort();

        match outcome {
            Ok(result) => match queue.complete(name, &job.id, result).await {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    metrics::record_job_completed(name, elapsed.as_secs_f64());
                    logger.log_completion(&format!("in {:.2}s", elapsed.as_secs_f64()));
                }
                Err(e) => logger.log_error(&format!("failed to record completion: {}", e)),
            },
            Err(err) => {
                let retryable =
                    !err.is_permanent() && !(settings.fail_fast_validation && err.is_validation());
                let reason = err.to_string();

                match queue.fail(name, &job.id, &reason, retryable).await {
                    Ok(FailureOutcome::Retrying { attempt, delay }) => {
                        metrics::record_job_retried(name, err.class());
                        logger.log_warning(&format!(
                            "attempt {} failed ({}, transient: {}), retrying in {:?}: {}",
                            attempt,
                            err.class(),
                            err.is_retryable(),
                            delay,
                            reason
                        ));
                    }
                    Ok(FailureOutcome::Failed) => {
                        metrics::record_job_failed(name, err.class());
                        logger.log_error(&format!("failed permanently: {}", reason));
                    }
                    Err(e) => {
                        error!(job_id = %job.id, "Failed to record failure ({}): {}", reason, e)
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// One worker per job kind over shared queue and storage clients.
pub struct WorkerRuntime {
    workers: Vec<QueueWorker>,
    shutdown: watch::Sender<bool>,
}

impl WorkerRuntime {
    /// Poster, sprite and optimize workers configured from `config`.
    pub fn new(
        config: &WorkerConfig,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ObjectStore>,
        lock_ttl: Duration,
    ) -> Self {
        let handlers: Vec<Arc<dyn JobHandler>> = vec![
            Arc::new(PosterHandler::new(Arc::clone(&store), config.poster)),
            Arc::new(SpriteHandler::new(Arc::clone(&store), config.sprite)),
            Arc::new(OptimizeHandler::new(store)),
        ];

        let workers = handlers
            .into_iter()
            .map(|handler| {
                let settings = WorkerSettings::from_config(config, handler.kind(), lock_ttl);
                QueueWorker::new(handler, Arc::clone(&queue), settings)
            })
            .collect();
        Self::from_workers(workers)
    }

    pub fn from_workers(workers: Vec<QueueWorker>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { workers, shutdown }
    }

    /// Run every worker until shutdown and all of them have drained.
    pub async fn run(&self) -> WorkerResult<()> {
        let names: Vec<_> = self.workers.iter().map(|w| w.queue_name()).collect();
        info!("Worker runtime started for queues {:?}", names);

        let results = futures::future::join_all(
            self.workers
                .iter()
                .map(|worker| worker.run(self.shutdown.subscribe())),
        )
        .await;

        for result in results {
            result?;
        }
        info!("Worker runtime stopped");
        Ok(())
    }

    /// Ask every worker to stop dequeuing and drain.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
