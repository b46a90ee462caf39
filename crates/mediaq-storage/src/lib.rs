//! Object storage for derivative generation.
//!
//! This crate provides:
//! - The `ObjectStore` abstraction handlers read from and write to
//! - An S3 client (path-style, MinIO compatible) with bucket auto-creation
//! - An in-memory store with the same semantics, for tests

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use store::{ObjectMeta, ObjectStore, PutOptions};
