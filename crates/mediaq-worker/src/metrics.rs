//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use mediaq_queue::JobCounts;

use crate::error::{WorkerError, WorkerResult};

/// Start the Prometheus exporter on `0.0.0.0:{port}`.
///
/// Must be called from inside the tokio runtime.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "mediaq_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "mediaq_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "mediaq_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "mediaq_jobs_retried_total";
    pub const JOB_DURATION_SECONDS: &str = "mediaq_job_duration_seconds";
    pub const BYTES_UPLOADED_TOTAL: &str = "mediaq_bytes_uploaded_total";
    pub const QUEUE_JOBS: &str = "mediaq_queue_jobs";
}

pub fn record_job_started(queue: &str) {
    let labels = [("queue", queue.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(queue: &str, duration_secs: f64) {
    let labels = [("queue", queue.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Terminal failure.
pub fn record_job_failed(queue: &str, class: &str) {
    let labels = [("queue", queue.to_string()), ("class", class.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Failed attempt that will run again.
pub fn record_job_retried(queue: &str, class: &str) {
    let labels = [("queue", queue.to_string()), ("class", class.to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_bytes_uploaded(queue: &str, bytes: u64) {
    let labels = [("queue", queue.to_string())];
    counter!(names::BYTES_UPLOADED_TOTAL, &labels).increment(bytes);
}

/// Publish the per-state job counts of a queue.
pub fn set_queue_counts(queue: &str, counts: &JobCounts) {
    for (state, value) in [
        ("waiting", counts.waiting),
        ("active", counts.active),
        ("delayed", counts.delayed),
        ("completed", counts.completed),
        ("failed", counts.failed),
    ] {
        let labels = [("queue", queue.to_string()), ("state", state.to_string())];
        gauge!(names::QUEUE_JOBS, &labels).set(value as f64);
    }
}
