//! Job queue on Redis.
//!
//! Per queue `q` under prefix `p`:
//! - `p:q:job:{id}`  hash holding the job record
//! - `p:q:wait`      list of runnable ids (FIFO, pop from the left)
//! - `p:q:delayed`   sorted set of retrying ids scored by ready time (ms)
//! - `p:q:active`    list of ids held by workers
//! - `p:q:lock:{id}` lease key of an active job (expires after the lock TTL)
//! - `p:q:completed` / `p:q:failed` retained terminal ids, newest first
//!
//! Every state transition touching more than one key runs as a Lua script so
//! it is atomic with respect to other workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use mediaq_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::job::{EnqueueOutcome, FailureOutcome, JobCounts, JobOptions, JobRecord};
use crate::progress::ProgressEvent;
use crate::queue::{JobQueue, QueueConfig};

const ENQUEUE_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if state == 'waiting' or state == 'active' then
  return 0
end
if state then
  redis.call('LREM', KEYS[3], 0, ARGV[1])
  redis.call('LREM', KEYS[4], 0, ARGV[1])
  redis.call('DEL', KEYS[1])
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
"#;

const NEXT_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('RPUSH', KEYS[1], id)
end
while true do
  local id = redis.call('LMOVE', KEYS[1], KEYS[3], 'LEFT', 'RIGHT')
  if not id then
    return false
  end
  local jobKey = ARGV[3] .. 'job:' .. id
  if redis.call('EXISTS', jobKey) == 1 then
    redis.call('HSET', jobKey, 'state', 'active', 'processed_at', ARGV[1])
    redis.call('SET', ARGV[3] .. 'lock:' .. id, '1', 'PX', ARGV[2])
    return redis.call('HGETALL', jobKey)
  end
  redis.call('LREM', KEYS[3], 0, id)
end
"#;

const PROGRESS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'progress', ARGV[1])
redis.call('PUBLISH', ARGV[2], ARGV[3])
return 1
"#;

const COMPLETE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'state') ~= 'active' then
  return -1
end
redis.call('LREM', KEYS[2], 0, ARGV[1])
redis.call('DEL', KEYS[4])
redis.call('HSET', KEYS[1], 'state', 'completed', 'result', ARGV[2], 'finished_at', ARGV[3])
redis.call('LPUSH', KEYS[3], ARGV[1])
local keep = tonumber(ARGV[4])
local evicted = 0
while redis.call('LLEN', KEYS[3]) > keep do
  local old = redis.call('RPOP', KEYS[3])
  redis.call('DEL', ARGV[5] .. 'job:' .. old)
  evicted = evicted + 1
end
return evicted
"#;

const FAIL_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'state') ~= 'active' then
  return {-1, 0, 0}
end
redis.call('LREM', KEYS[2], 0, ARGV[1])
redis.call('DEL', KEYS[5])
local attempts = redis.call('HINCRBY', KEYS[1], 'attempts_made', 1)
local maxAttempts = tonumber(redis.call('HGET', KEYS[1], 'max_attempts'))
redis.call('HSET', KEYS[1], 'failure_reason', ARGV[2])
if ARGV[4] == '1' and attempts < maxAttempts then
  local base = tonumber(redis.call('HGET', KEYS[1], 'backoff_delay_ms'))
  local delay = math.floor(base * 2 ^ (attempts - 1))
  redis.call('HSET', KEYS[1], 'state', 'waiting')
  redis.call('ZADD', KEYS[3], tonumber(ARGV[3]) + delay, ARGV[1])
  return {1, attempts, delay}
end
redis.call('HSET', KEYS[1], 'state', 'failed', 'finished_at', ARGV[3])
redis.call('LPUSH', KEYS[4], ARGV[1])
local keep = tonumber(ARGV[5])
while redis.call('LLEN', KEYS[4]) > keep do
  local old = redis.call('RPOP', KEYS[4])
  redis.call('DEL', ARGV[6] .. 'job:' .. old)
end
return {0, attempts, 0}
"#;

const EXTEND_LOCK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[2], 'state') ~= 'active' then
  return 0
end
redis.call('SET', KEYS[1], '1', 'PX', ARGV[1])
return 1
"#;

const RECOVER_STALLED_SCRIPT: &str = r#"
local ids = redis.call('LRANGE', KEYS[1], 0, -1)
local recovered = 0
for _, id in ipairs(ids) do
  if redis.call('EXISTS', ARGV[1] .. 'lock:' .. id) == 0 then
    redis.call('LREM', KEYS[1], 0, id)
    local jobKey = ARGV[1] .. 'job:' .. id
    if redis.call('EXISTS', jobKey) == 1 then
      redis.call('HSET', jobKey, 'state', 'waiting')
      redis.call('LPUSH', KEYS[2], id)
      recovered = recovered + 1
    end
  end
end
return recovered
"#;

/// Key layout of one queue.
struct QueueKeys {
    base: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{}:{}:", prefix, queue),
        }
    }

    fn job(&self, id: &JobId) -> String {
        format!("{}job:{}", self.base, id)
    }

    fn lock(&self, id: &JobId) -> String {
        format!("{}lock:{}", self.base, id)
    }

    fn list(&self, name: &str) -> String {
        format!("{}{}", self.base, name)
    }
}

/// Redis-backed job queue.
///
/// Cloning is cheap; clones share one multiplexed, auto-reconnecting
/// connection.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: redis::Client,
    conn: ConnectionManager,
    config: QueueConfig,
    scripts: Arc<Scripts>,
}

struct Scripts {
    enqueue: Script,
    next: Script,
    progress: Script,
    complete: Script,
    fail: Script,
    extend_lock: Script,
    recover_stalled: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE_SCRIPT),
            next: Script::new(NEXT_SCRIPT),
            progress: Script::new(PROGRESS_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            extend_lock: Script::new(EXTEND_LOCK_SCRIPT),
            recover_stalled: Script::new(RECOVER_STALLED_SCRIPT),
        }
    }
}

impl RedisJobQueue {
    /// Connect to Redis.
    pub async fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        info!("Connected job queue to Redis (prefix {})", config.prefix);
        Ok(Self {
            client,
            conn,
            config,
            scripts: Arc::new(Scripts::load()),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env()).await
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis answered {}", pong);
        Ok(())
    }

    /// Subscribe to the progress events of one job.
    pub async fn subscribe_progress(
        &self,
        queue: &str,
        id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = ProgressEvent::channel_name(&self.config.prefix, queue, id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.config.prefix, queue)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<EnqueueOutcome> {
        let keys = self.keys(queue);
        let record = JobRecord::new(name, payload, &options);
        let id = record.id.clone();

        let mut invocation = self.scripts.enqueue.prepare_invoke();
        invocation
            .key(keys.job(&id))
            .key(keys.list("wait"))
            .key(keys.list("completed"))
            .key(keys.list("failed"))
            .arg(id.as_str());
        for (field, value) in record.to_hash()? {
            invocation.arg(field).arg(value);
        }

        let mut conn = self.conn.clone();
        let added: i64 = invocation.invoke_async(&mut conn).await?;

        if added == 1 {
            debug!("Enqueued job {} on {}", id, queue);
            Ok(EnqueueOutcome::Enqueued)
        } else {
            debug!("Job {} already pending on {}", id, queue);
            Ok(EnqueueOutcome::Duplicate)
        }
    }

    async fn next_job(&self, queue: &str) -> QueueResult<Option<JobRecord>> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let fields: Option<HashMap<String, String>> = self
            .scripts
            .next
            .key(keys.list("wait"))
            .key(keys.list("delayed"))
            .key(keys.list("active"))
            .arg(Self::now_ms())
            .arg(self.config.lock_ttl.as_millis() as u64)
            .arg(&keys.base)
            .invoke_async(&mut conn)
            .await?;

        fields
            .filter(|f| !f.is_empty())
            .map(|f| JobRecord::from_hash(&f))
            .transpose()
    }

    async fn update_progress(&self, queue: &str, id: &JobId, percent: u8) -> QueueResult<()> {
        let keys = self.keys(queue);
        let event = ProgressEvent::new(queue, id, percent);
        let channel = ProgressEvent::channel_name(&self.config.prefix, queue, id);
        let mut conn = self.conn.clone();

        let found: i64 = self
            .scripts
            .progress
            .key(keys.job(id))
            .arg(u32::from(event.progress))
            .arg(channel)
            .arg(serde_json::to_string(&event)?)
            .invoke_async(&mut conn)
            .await?;

        if found == 0 {
            return Err(QueueError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn complete(
        &self,
        queue: &str,
        id: &JobId,
        result: serde_json::Value,
    ) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let evicted: i64 = self
            .scripts
            .complete
            .key(keys.job(id))
            .key(keys.list("active"))
            .key(keys.list("completed"))
            .key(keys.lock(id))
            .arg(id.as_str())
            .arg(serde_json::to_string(&result)?)
            .arg(Self::now_ms())
            .arg(self.config.keep_completed)
            .arg(&keys.base)
            .invoke_async(&mut conn)
            .await?;

        if evicted < 0 {
            return Err(QueueError::JobNotActive(id.to_string()));
        }
        if evicted > 0 {
            debug!("Evicted {} completed records from {}", evicted, queue);
        }
        Ok(())
    }

    async fn fail(
        &self,
        queue: &str,
        id: &JobId,
        reason: &str,
        retryable: bool,
    ) -> QueueResult<FailureOutcome> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = self
            .scripts
            .fail
            .key(keys.job(id))
            .key(keys.list("active"))
            .key(keys.list("delayed"))
            .key(keys.list("failed"))
            .key(keys.lock(id))
            .arg(id.as_str())
            .arg(reason)
            .arg(Self::now_ms())
            .arg(if retryable { "1" } else { "0" })
            .arg(self.config.keep_failed)
            .arg(&keys.base)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [1, attempt, delay_ms] => Ok(FailureOutcome::Retrying {
                attempt: *attempt as u32,
                delay: Duration::from_millis((*delay_ms).max(0) as u64),
            }),
            [0, ..] => Ok(FailureOutcome::Failed),
            [-1, ..] => Err(QueueError::JobNotActive(id.to_string())),
            other => Err(QueueError::invalid_record(format!(
                "unexpected fail reply {:?}",
                other
            ))),
        }
    }

    async fn extend_lock(&self, queue: &str, id: &JobId) -> QueueResult<bool> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let extended: i64 = self
            .scripts
            .extend_lock
            .key(keys.lock(id))
            .key(keys.job(id))
            .arg(self.config.lock_ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn recover_stalled(&self, queue: &str) -> QueueResult<u32> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let recovered: u32 = self
            .scripts
            .recover_stalled
            .key(keys.list("active"))
            .key(keys.list("wait"))
            .arg(&keys.base)
            .invoke_async(&mut conn)
            .await?;

        if recovered > 0 {
            warn!("Recovered {} stalled jobs on {}", recovered, queue);
        }
        Ok(recovered)
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.keys(queue).job(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        JobRecord::from_hash(&fields).map(Some)
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let (waiting, active, completed, failed, delayed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .cmd("LLEN")
                .arg(keys.list("wait"))
                .cmd("LLEN")
                .arg(keys.list("active"))
                .cmd("LLEN")
                .arg(keys.list("completed"))
                .cmd("LLEN")
                .arg(keys.list("failed"))
                .cmd("ZCARD")
                .arg(keys.list("delayed"))
                .query_async(&mut conn)
                .await?;

        Ok(JobCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }
}
