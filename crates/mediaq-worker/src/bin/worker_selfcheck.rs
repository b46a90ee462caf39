use anyhow::Context;

use mediaq_queue::RedisJobQueue;
use mediaq_storage::S3Client;
use mediaq_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with concurrency poster={} sprite={} optimize={}",
        config.poster_concurrency, config.sprite_concurrency, config.optimize_concurrency
    );
    ensure_env_present(&[
        "REDIS_URL",
        "S3_ENDPOINT_URL",
        "S3_ACCESS_KEY_ID",
        "S3_SECRET_ACCESS_KEY",
    ])?;
    ensure_redis().await?;
    ensure_storage().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_redis() -> anyhow::Result<()> {
    let queue = RedisJobQueue::from_env()
        .await
        .context("redis connection failed")?;
    queue.ping().await.context("redis ping failed")?;
    println!("worker-selfcheck: redis reachable");
    Ok(())
}

async fn ensure_storage() -> anyhow::Result<()> {
    let store = S3Client::from_env().context("storage configuration invalid")?;
    let buckets = store
        .list_buckets()
        .await
        .context("storage list_buckets failed")?;
    println!("worker-selfcheck: storage reachable ({} buckets)", buckets.len());
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
