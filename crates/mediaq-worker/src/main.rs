//! Derivative worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use mediaq_queue::{QueueConfig, RedisJobQueue};
use mediaq_storage::S3Client;
use mediaq_worker::logging::init_tracing;
use mediaq_worker::metrics::init_metrics;
use mediaq_worker::retry::{retry_async, RetryConfig};
use mediaq_worker::{WorkerConfig, WorkerRuntime};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let instance = Uuid::new_v4();
    info!("Starting mediaq-worker {}", instance);

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match init_metrics(port) {
            Ok(()) => info!("Serving Prometheus metrics on port {}", port),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    let queue_config = QueueConfig::from_env();
    let lock_ttl = queue_config.lock_ttl;
    let queue = match retry_async(&RetryConfig::new("Redis connect"), || {
        RedisJobQueue::new(queue_config.clone())
    })
    .await
    {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to connect job queue: {}", e);
            std::process::exit(1);
        }
    };

    let store = match S3Client::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create storage client: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = Arc::new(WorkerRuntime::new(
        &config,
        Arc::new(queue),
        Arc::new(store),
        lock_ttl,
    ));

    // Setup signal handlers
    let signal_runtime = Arc::clone(&runtime);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, draining in-flight jobs");
        signal_runtime.shutdown();
    });

    if let Err(e) = runtime.run().await {
        error!("Worker runtime error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
