//! Redis-backed counter store.
//!
//! Shares counters across every instance pointing at the same Redis. Expiry
//! is native, so `purge_expired` keeps the trait default. Each command is
//! bounded by a timeout so a stalled server degrades into the limiter's
//! fail-open path instead of stalling requests.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::CounterStore;
use crate::error::{StoreError, StoreResult};

/// Connection settings for [`RedisCounterStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix prepended to every key, separated by `:`
    pub key_prefix: String,
    /// Upper bound for a single command round-trip
    pub command_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "hivegate".to_string(),
            command_timeout: Duration::from_millis(250),
        }
    }
}

/// Counter store backed by Redis `INCR`/`EXPIRE`/`GET`/`SET EX`.
pub struct RedisCounterStore {
    connection: ConnectionManager,
    key_prefix: String,
    command_timeout: Duration,
}

impl RedisCounterStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection = bounded(config.command_timeout, ConnectionManager::new(client)).await?;

        let store = Self {
            connection,
            key_prefix: config.key_prefix,
            command_timeout: config.command_timeout,
        };

        let mut conn = store.connection.clone();
        let _: String = store
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;

        info!(url = %config.url, prefix = %store.key_prefix, "Connected to Redis counter store");
        Ok(store)
    }

    /// Build the full Redis key.
    fn key(&self, key: &str) -> String {
        prefixed(&self.key_prefix, key)
    }

    async fn bounded<T, F>(&self, command: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        bounded(self.command_timeout, command).await
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

/// Redis expiry has whole-second resolution; never send 0, which deletes the key.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

async fn bounded<T, F>(timeout: Duration, command: F) -> StoreResult<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, command).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.connection.clone();
        let full_key = self.key(key);

        let value: i64 = self
            .bounded(redis::cmd("INCR").arg(&full_key).query_async(&mut conn))
            .await?;

        debug!(key = %full_key, value = value, "Redis INCR");
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let full_key = self.key(key);

        let applied: bool = self
            .bounded(
                redis::cmd("EXPIRE")
                    .arg(&full_key)
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn),
            )
            .await?;

        Ok(applied)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection.clone();
        let full_key = self.key(key);

        let value: Option<String> = self
            .bounded(redis::cmd("GET").arg(&full_key).query_async(&mut conn))
            .await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let full_key = self.key(key);

        let _: () = self
            .bounded(
                redis::cmd("SET")
                    .arg(&full_key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn),
            )
            .await?;

        debug!(key = %full_key, ttl_secs = ttl_secs(ttl), "Redis SET EX");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
