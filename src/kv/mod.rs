//! Shared cache/queue store: counters, TTL'd values, lists, locks and hashes.
//!
//! Injected everywhere as `Arc<dyn KvStore>`; Redis in production, [`MemoryKv`] for single
//! process dev runs and tests.

mod memory;
mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryKv;
pub use self::redis::RedisKv;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
    #[error("kv operation failed: {0}")]
    Operation(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    /// Atomically increments a counter; the TTL is set when the counter is created.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, KvError>;

    /// Set-if-not-exists with TTL. `true` means the caller now holds the lock.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Appends to the tail of a list and returns its new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError>;

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn llen(&self, key: &str) -> Result<u64, KvError>;

    /// Reads the whole list and deletes it in one step.
    async fn drain_list(&self, key: &str) -> Result<Vec<String>, KvError>;

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), KvError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError>;
}
