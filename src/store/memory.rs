//! In-process counter store.
//!
//! Suitable for single-instance deployments and tests. Expiry is evaluated
//! lazily on access; [`CounterStore::purge_expired`] reclaims memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::CounterStore;
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};

/// A stored value and its optional expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

/// DashMap-backed store with per-key TTLs.
///
/// Increments hold the shard lock for the key, so concurrent increments on
/// the same key never lose updates.
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of entries held, including ones that have expired but not been purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Expiry instant for `ttl`; a TTL beyond the representable range never expires.
fn deadline(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0", None));

        if !entry.is_live(now) {
            *entry = Entry::new("0", None);
        }

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::NotAnInteger(key.to_string()))?;
        let next = current + 1;
        entry.value = next.to_string();

        trace!(key = key, value = next, "Incremented in-process counter");
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.clock.now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = deadline(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.now();
        self.entries
            .insert(key.to_string(), Entry::new(value, deadline(now, ttl)));
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
