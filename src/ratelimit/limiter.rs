//! Core rate limiter implementation.
//!
//! All state lives in a shared [`CounterStore`]; the limiter itself holds no
//! locks and can run in any number of instances at once. Every check is a
//! handful of single-key atomic operations, and every failure of the store
//! degrades to admitting the request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::policy::LimitPolicy;
use super::scope::Scope;
use super::window::TimeWindow;
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitingConfig;
use crate::error::StoreResult;
use crate::store::CounterStore;

/// Value written for a block record; only its presence matters.
const BLOCK_MARKER: &str = "blocked";

/// Runtime switches for the limiter, fixed at construction.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// When false, every check admits without touching the store
    pub enabled: bool,
    /// Denials within `violation_ttl` that escalate into a block
    pub violation_threshold: u32,
    /// Lifetime of the violation counter
    pub violation_ttl: Duration,
    /// Lifetime of a block record
    pub block_duration: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            violation_threshold: 3,
            violation_ttl: Duration::from_secs(3600),
            block_duration: Duration::from_secs(300),
        }
    }
}

impl From<&RateLimitingConfig> for LimiterSettings {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            enabled: config.enabled,
            violation_threshold: config.violation_threshold,
            violation_ttl: Duration::from_secs(config.violation_ttl_secs),
            block_duration: Duration::from_secs(config.block_duration_secs),
        }
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Per-minute limit the decision was made against
    pub limit: u64,
    /// Requests left in the current minute window, never negative
    pub remaining: u64,
    /// End of the current minute window
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// Admit without consulting any counter.
    fn unrestricted(policy: &LimitPolicy, now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit: policy.per_minute,
            remaining: policy.per_minute,
            reset_at: TimeWindow::Minute.reset_at(now),
        }
    }

    /// Seconds a denied client should wait, at least one.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        let wait = (self.reset_at - now).num_seconds().max(1);
        Duration::from_secs(wait as u64)
    }
}

fn window_key(scope: &Scope, window: TimeWindow, now: DateTime<Utc>) -> String {
    format!(
        "rate_limit:{}:{}:{}",
        scope.to_key(),
        window.label(),
        window.bucket(now)
    )
}

fn violation_key(scope: &Scope) -> String {
    format!("violations:{}", scope.to_key())
}

fn block_key(scope: &Scope) -> String {
    format!("blocked:{}", scope.to_key())
}

fn parse_count(value: Option<String>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// The request-admission engine.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    settings: LimiterSettings,
}

impl RateLimiter {
    /// Create a limiter over a store, using the system clock.
    pub fn new(store: Arc<dyn CounterStore>, settings: LimiterSettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn CounterStore>,
        settings: LimiterSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Count a request against the minute and hour windows.
    ///
    /// Counters are incremented before they are compared, so a denied call
    /// still counts. On denial the scope's violation counter advances and may
    /// escalate into a block.
    pub async fn allow(&self, scope: &Scope, policy: &LimitPolicy) -> Decision {
        let now = self.clock.now();

        if !self.settings.enabled {
            return Decision::unrestricted(policy, now);
        }

        let (minute_count, violated) = match self.count_windows(scope, policy, now).await {
            Ok(counts) => counts,
            Err(e) => {
                self.store_failed("allow", scope, &e);
                return Decision::unrestricted(policy, now);
            }
        };

        let allowed = violated.is_empty();
        let decision = Decision {
            allowed,
            limit: policy.per_minute,
            remaining: policy.per_minute.saturating_sub(minute_count),
            reset_at: TimeWindow::Minute.reset_at(now),
        };

        if allowed {
            record_request(scope, "allowed");
        } else {
            debug!(
                scope = %scope,
                windows = ?violated,
                minute_count = minute_count,
                limit = policy.per_minute,
                "Rate limit exceeded"
            );
            record_request(scope, "denied");
            self.record_violation(scope).await;
        }

        decision
    }

    async fn count_windows(
        &self,
        scope: &Scope,
        policy: &LimitPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<(u64, Vec<TimeWindow>)> {
        let mut minute_count = 0;
        let mut violated = Vec::new();

        for window in TimeWindow::QUOTA_WINDOWS {
            let key = window_key(scope, window, now);
            let count = self.bump(&key, window.duration()).await?;
            let limit = policy.limit_for(window);

            trace!(scope = %scope, window = window.label(), count = count, limit = limit, "Counted request");

            if window == TimeWindow::Minute {
                minute_count = count;
            }
            if count > limit {
                violated.push(window);
            }
        }

        Ok((minute_count, violated))
    }

    /// Increment a key and start its TTL when this call created it.
    async fn bump(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let value = self.store.increment(key).await?;
        if value == 1 {
            self.store.expire(key, ttl).await?;
        }
        Ok(u64::try_from(value).unwrap_or(0))
    }

    async fn record_violation(&self, scope: &Scope) {
        let key = violation_key(scope);
        let violations = match self.bump(&key, self.settings.violation_ttl).await {
            Ok(count) => count,
            Err(e) => {
                self.store_failed("record_violation", scope, &e);
                return;
            }
        };

        if violations < self.settings.violation_threshold as u64 {
            return;
        }

        if let Err(e) = self
            .store
            .set(&block_key(scope), BLOCK_MARKER, self.settings.block_duration)
            .await
        {
            self.store_failed("block", scope, &e);
            return;
        }

        // Start the next escalation from zero once this block lapses.
        if let Err(e) = self.store.set(&key, "0", self.settings.violation_ttl).await {
            self.store_failed("reset_violations", scope, &e);
        }

        warn!(
            scope = %scope,
            violations = violations,
            block_secs = self.settings.block_duration.as_secs(),
            "Blocked scope after repeated rate limit violations"
        );
        counter!(
            "rate_limit_blocks_total",
            "subject" => scope.kind().as_str(),
            "operation" => scope.operation().as_str()
        )
        .increment(1);
    }

    /// Whether the scope is serving a block. Store failures read as not blocked.
    pub async fn is_blocked(&self, scope: &Scope) -> bool {
        if !self.settings.enabled {
            return false;
        }

        match self.store.get(&block_key(scope)).await {
            Ok(Some(_)) => {
                record_request(scope, "blocked");
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.store_failed("is_blocked", scope, &e);
                false
            }
        }
    }

    /// Count a request against the one-second burst bucket.
    ///
    /// Independent of the minute and hour windows.
    pub async fn allow_burst(&self, scope: &Scope, burst_capacity: u64) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let now = self.clock.now();
        let key = window_key(scope, TimeWindow::Burst, now);
        match self.bump(&key, TimeWindow::Burst.duration()).await {
            Ok(count) => {
                let allowed = count <= burst_capacity;
                if !allowed {
                    debug!(scope = %scope, count = count, capacity = burst_capacity, "Burst capacity exhausted");
                }
                allowed
            }
            Err(e) => {
                self.store_failed("allow_burst", scope, &e);
                true
            }
        }
    }

    /// Requests left in the current minute window, without counting one.
    pub async fn remaining_requests(&self, scope: &Scope, policy: &LimitPolicy) -> u64 {
        policy.per_minute.saturating_sub(self.current_usage(scope).await)
    }

    /// End of the current minute window.
    pub fn reset_time(&self, _scope: &Scope) -> DateTime<Utc> {
        TimeWindow::Minute.reset_at(self.clock.now())
    }

    /// Requests counted in the current minute window.
    pub async fn current_usage(&self, scope: &Scope) -> u64 {
        let key = window_key(scope, TimeWindow::Minute, self.clock.now());
        match self.store.get(&key).await {
            Ok(value) => parse_count(value),
            Err(e) => {
                self.store_failed("current_usage", scope, &e);
                0
            }
        }
    }

    /// Denials recorded toward the next block.
    pub async fn violation_count(&self, scope: &Scope) -> u32 {
        match self.store.get(&violation_key(scope)).await {
            Ok(value) => u32::try_from(parse_count(value)).unwrap_or(u32::MAX),
            Err(e) => {
                self.store_failed("violation_count", scope, &e);
                0
            }
        }
    }

    /// Zero the scope's current burst, minute and hour counters.
    ///
    /// Administrative relief for a caller. Violations and an active block are
    /// left in place; a block only ends when its TTL lapses.
    pub async fn reset_window_counters(&self, scope: &Scope) -> StoreResult<()> {
        let now = self.clock.now();
        for window in [TimeWindow::Burst, TimeWindow::Minute, TimeWindow::Hour] {
            self.store
                .set(&window_key(scope, window, now), "0", window.duration())
                .await
                .map_err(|e| {
                    self.store_failed("reset_window_counters", scope, &e);
                    e
                })?;
        }
        info!(scope = %scope, "Reset rate limit window counters");
        Ok(())
    }

    /// Reclaim expired counters in stores without native expiry.
    ///
    /// Idempotent and safe to run alongside live traffic.
    pub async fn cleanup_expired_buckets(&self) {
        match self.store.purge_expired().await {
            Ok(0) => trace!(store = self.store.name(), "No expired counters to purge"),
            Ok(purged) => debug!(store = self.store.name(), purged = purged, "Purged expired counters"),
            Err(e) => warn!(store = self.store.name(), error = %e, "Counter cleanup failed"),
        }
    }

    fn store_failed(&self, operation: &'static str, scope: &Scope, error: &crate::error::StoreError) {
        warn!(
            store = self.store.name(),
            operation = operation,
            scope = %scope,
            error = %error,
            "Counter store unavailable, failing open"
        );
        counter!("rate_limit_store_errors_total", "store" => self.store.name()).increment(1);
    }
}

fn record_request(scope: &Scope, result: &'static str) {
    counter!(
        "rate_limit_requests_total",
        "result" => result,
        "subject" => scope.kind().as_str(),
        "operation" => scope.operation().as_str()
    )
    .increment(1);
}

/// Run [`RateLimiter::cleanup_expired_buckets`] on a fixed interval.
pub fn spawn_cleanup_task(limiter: Arc<RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limiter.cleanup_expired_buckets().await;
        }
    })
}
