//! Durable job queue for derivative jobs.
//!
//! This crate provides:
//! - The `JobQueue` abstraction the worker runtime drives
//! - A Redis implementation (lists + sorted set, atomic Lua transitions)
//! - An in-memory implementation with identical semantics, for tests
//! - Job-id deduplication, exponential retry backoff, bounded retention
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod job;
pub mod memory;
pub mod progress;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use job::{EnqueueOutcome, FailureOutcome, JobCounts, JobOptions, JobRecord};
pub use memory::MemoryJobQueue;
pub use progress::ProgressEvent;
pub use queue::{submit, JobQueue, QueueConfig};
pub use redis_queue::RedisJobQueue;
