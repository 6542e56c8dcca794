//! Shared counter storage.
//!
//! The limiter keeps every piece of state (window counters, burst buckets,
//! violation counters, block records) behind the [`CounterStore`] trait so
//! many stateless instances can coordinate through one backend.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::{RedisCounterStore, RedisStoreConfig};

/// Atomic increment-with-expiry key/value store.
///
/// Implementations must make `increment` and `expire` atomic per key; the
/// limiter holds no locks of its own.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the integer at `key`, creating it at 0 first. Returns the new value.
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Set a time-to-live on an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Read the value at `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write `value` at `key` with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Drop entries whose TTL has lapsed. Stores with native expiry have nothing to do.
    async fn purge_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }

    /// Short backend name for logs and metric labels.
    fn name(&self) -> &'static str;
}
