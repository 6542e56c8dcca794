//! HTTP admission gate.
//!
//! [`Gate`] turns request metadata into an admission outcome; [`RateLimitLayer`]
//! wires it into an axum router as tower middleware.

mod identity;
mod layer;
mod response;

pub use identity::{
    classify_operation, resolve_identity, AuthenticatedSubject, RequestMetadata, FORWARDED_FOR,
    REAL_IP,
};
pub use layer::{RateLimitLayer, RateLimitService};
pub use response::{RejectReason, Rejection};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::ratelimit::{Decision, LimitPolicy, OperationClass, PolicyResolver, RateLimiter, Scope};
use identity::matches_prefix;

/// Request routing rules for the gate.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Paths that are never limited
    pub excluded_paths: Vec<String>,
    /// Operation classes that are never limited
    pub excluded_operations: Vec<OperationClass>,
    pub admin_path_prefixes: Vec<String>,
    pub public_path_prefixes: Vec<String>,
    /// Check the per-second burst bucket before the quota windows
    pub enforce_burst: bool,
    /// `Retry-After` sent to blocked callers.
    ///
    /// The store only records that a block exists, not when it started, so
    /// this is an upper bound: the full cooldown. `X-RateLimit-Reset` on a
    /// blocked response is the same bound, measured from now.
    pub block_retry_after: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self::from(&RateLimitingConfig::default())
    }
}

impl From<&RateLimitingConfig> for GateSettings {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            excluded_paths: config.excluded_paths.clone(),
            excluded_operations: config.excluded_operations.clone(),
            admin_path_prefixes: config.admin_path_prefixes.clone(),
            public_path_prefixes: config.public_path_prefixes.clone(),
            enforce_burst: config.enforce_burst,
            block_retry_after: config.block_duration(),
        }
    }
}

/// What the gate decided for one request.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// Not subject to limiting; no headers are set
    Bypass,
    /// Admitted and counted
    Admitted { scope: Scope, decision: Decision },
    /// Short-circuited with a 429
    Rejected(Rejection),
}

/// Combines identity resolution, policy lookup and the limiter.
pub struct Gate {
    limiter: Arc<RateLimiter>,
    policies: PolicyResolver,
    settings: GateSettings,
}

impl Gate {
    pub fn new(limiter: Arc<RateLimiter>, policies: PolicyResolver, settings: GateSettings) -> Self {
        Self {
            limiter,
            policies,
            settings,
        }
    }

    /// Build a gate from the rate limiting section of the configuration.
    pub fn from_config(limiter: Arc<RateLimiter>, config: &RateLimitingConfig) -> Result<Self> {
        let policies = PolicyResolver::new(config.policies.clone())?;
        info!(
            excluded_paths = ?config.excluded_paths,
            enforce_burst = config.enforce_burst,
            "Rate limit gate configured"
        );
        Ok(Self::new(limiter, policies, GateSettings::from(config)))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    fn is_excluded_path(&self, path: &str) -> bool {
        self.settings
            .excluded_paths
            .iter()
            .any(|excluded| matches_prefix(path, excluded))
    }

    /// Decide whether a request may proceed.
    pub async fn evaluate(&self, metadata: &RequestMetadata) -> GateOutcome {
        if !self.limiter.is_enabled() || self.is_excluded_path(&metadata.path) {
            return GateOutcome::Bypass;
        }

        let operation = classify_operation(
            &metadata.method,
            &metadata.path,
            &self.settings.admin_path_prefixes,
            &self.settings.public_path_prefixes,
        );
        if self.settings.excluded_operations.contains(&operation) {
            return GateOutcome::Bypass;
        }

        let scope = resolve_identity(metadata, operation);
        let policy = self
            .policies
            .resolve(scope.kind(), metadata.role(), operation);

        if self.limiter.is_blocked(&scope).await {
            debug!(scope = %scope, path = %metadata.path, "Rejecting request from blocked scope");
            return GateOutcome::Rejected(self.reject(
                RejectReason::Blocked,
                scope,
                &policy,
                self.settings.block_retry_after,
                None,
            ));
        }

        if self.settings.enforce_burst
            && !self.limiter.allow_burst(&scope, policy.burst_capacity).await
        {
            return GateOutcome::Rejected(self.reject(
                RejectReason::BurstExceeded,
                scope,
                &policy,
                Duration::from_secs(1),
                None,
            ));
        }

        let decision = self.limiter.allow(&scope, &policy).await;
        if decision.allowed {
            return GateOutcome::Admitted { scope, decision };
        }

        let retry_after = decision.retry_after(self.limiter.now());
        let violations = self.limiter.violation_count(&scope).await;
        GateOutcome::Rejected(self.reject(
            RejectReason::LimitExceeded,
            scope,
            &policy,
            retry_after,
            Some(violations),
        ))
    }

    fn reject(
        &self,
        reason: RejectReason,
        scope: Scope,
        policy: &LimitPolicy,
        retry_after: Duration,
        violations: Option<u32>,
    ) -> Rejection {
        let at = self.limiter.now();
        let reset_at = match reason {
            RejectReason::Blocked => chrono::Duration::from_std(retry_after)
                .ok()
                .and_then(|wait| at.checked_add_signed(wait))
                .unwrap_or_else(|| self.limiter.reset_time(&scope)),
            RejectReason::BurstExceeded | RejectReason::LimitExceeded => {
                self.limiter.reset_time(&scope)
            }
        };
        Rejection {
            reason,
            reset_at,
            scope,
            limit: policy.per_minute,
            retry_after,
            violations,
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::{LimiterSettings, OperationLimits, PolicyTable, SubjectKind, TierScaling};
    use crate::store::MemoryCounterStore;
    use axum::http::Method;
    use chrono::DateTime;

    const START: i64 = 1_704_067_200;

    fn gate_with(settings: LimiterSettings, gate_settings: GateSettings) -> (Gate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(START, 0).unwrap()));
        let store = Arc::new(MemoryCounterStore::with_clock(clock.clone()));
        let limiter = Arc::new(RateLimiter::with_clock(store, settings, clock.clone()));
        let table = PolicyTable {
            operations: OperationLimits {
                read: LimitPolicy::new(2, 100, 10),
                write: LimitPolicy::new(1, 100, 10),
                ..Default::default()
            },
            tiers: TierScaling::flat(),
        };
        let policies = PolicyResolver::new(table).unwrap();
        (Gate::new(limiter, policies, gate_settings), clock)
    }

    fn request(method: Method, path: &str) -> RequestMetadata {
        RequestMetadata {
            method,
            path: path.to_string(),
            subject: None,
            forwarded_for: Some("203.0.113.5".to_string()),
            real_ip: None,
            peer_addr: None,
        }
    }

    #[tokio::test]
    async fn test_admits_then_limits_then_blocks() {
        let (gate, _) = gate_with(LimiterSettings::default(), GateSettings::default());
        let meta = request(Method::GET, "/api/goals");

        for _ in 0..2 {
            assert!(matches!(gate.evaluate(&meta).await, GateOutcome::Admitted { .. }));
        }

        for expected in 1..=3u32 {
            match gate.evaluate(&meta).await {
                GateOutcome::Rejected(rejection) => {
                    assert_eq!(rejection.reason, RejectReason::LimitExceeded);
                    assert_eq!(rejection.limit, 2);
                    assert_eq!(rejection.retry_after, Duration::from_secs(60));
                    // The threshold-reaching denial resets the counter once the block is set.
                    let violations = if expected == 3 { 0 } else { expected };
                    assert_eq!(rejection.violations, Some(violations));
                }
                other => panic!("expected rejection, got {:?}", other),
            }
        }

        let scope = resolve_identity(&meta, OperationClass::Read);
        let usage = gate.limiter().current_usage(&scope).await;
        match gate.evaluate(&meta).await {
            GateOutcome::Rejected(rejection) => {
                assert_eq!(rejection.reason, RejectReason::Blocked);
                assert_eq!(rejection.retry_after, Duration::from_secs(300));
                // Reset header agrees with Retry-After rather than the minute window
                assert_eq!(rejection.reset_at.timestamp(), START + 300);
            }
            other => panic!("expected block, got {:?}", other),
        }
        assert_eq!(gate.limiter().current_usage(&scope).await, usage);
    }

    #[tokio::test]
    async fn test_block_lapses() {
        let (gate, clock) = gate_with(LimiterSettings::default(), GateSettings::default());
        let meta = request(Method::POST, "/api/goals");

        for _ in 0..4 {
            gate.evaluate(&meta).await;
        }
        assert!(matches!(
            gate.evaluate(&meta).await,
            GateOutcome::Rejected(Rejection { reason: RejectReason::Blocked, .. })
        ));

        clock.advance(Duration::from_secs(301));
        assert!(matches!(gate.evaluate(&meta).await, GateOutcome::Admitted { .. }));
    }

    #[tokio::test]
    async fn test_excluded_paths_and_operations_bypass() {
        let settings = GateSettings {
            excluded_operations: vec![OperationClass::Public],
            ..GateSettings::default()
        };
        let (gate, _) = gate_with(LimiterSettings::default(), settings);

        for _ in 0..10 {
            assert!(matches!(
                gate.evaluate(&request(Method::GET, "/health")).await,
                GateOutcome::Bypass
            ));
            assert!(matches!(
                gate.evaluate(&request(Method::GET, "/health/ready")).await,
                GateOutcome::Bypass
            ));
            assert!(matches!(
                gate.evaluate(&request(Method::GET, "/api/public/info")).await,
                GateOutcome::Bypass
            ));
        }
        assert!(matches!(
            gate.evaluate(&request(Method::GET, "/healthz")).await,
            GateOutcome::Admitted { .. }
        ));
    }

    #[tokio::test]
    async fn test_disabled_limiter_bypasses() {
        let settings = LimiterSettings {
            enabled: false,
            ..LimiterSettings::default()
        };
        let (gate, _) = gate_with(settings, GateSettings::default());
        for _ in 0..20 {
            assert!(matches!(
                gate.evaluate(&request(Method::POST, "/api/goals")).await,
                GateOutcome::Bypass
            ));
        }
    }

    #[tokio::test]
    async fn test_burst_rejection_retries_after_one_second() {
        let (gate, clock) = gate_with(LimiterSettings::default(), GateSettings::default());
        // Generous windows, tight burst
        let table = PolicyTable {
            operations: OperationLimits {
                read: LimitPolicy::new(100, 1000, 2),
                ..Default::default()
            },
            tiers: TierScaling::flat(),
        };
        let gate = Gate::new(
            gate.limiter().clone(),
            PolicyResolver::new(table).unwrap(),
            GateSettings::default(),
        );
        let meta = request(Method::GET, "/api/goals");

        assert!(matches!(gate.evaluate(&meta).await, GateOutcome::Admitted { .. }));
        assert!(matches!(gate.evaluate(&meta).await, GateOutcome::Admitted { .. }));
        match gate.evaluate(&meta).await {
            GateOutcome::Rejected(rejection) => {
                assert_eq!(rejection.reason, RejectReason::BurstExceeded);
                assert_eq!(rejection.retry_after, Duration::from_secs(1));
                assert_eq!(rejection.violations, None);
            }
            other => panic!("expected burst rejection, got {:?}", other),
        }

        clock.advance(Duration::from_secs(1));
        assert!(matches!(gate.evaluate(&meta).await, GateOutcome::Admitted { .. }));
    }

    #[tokio::test]
    async fn test_scopes_are_per_operation() {
        let (gate, _) = gate_with(LimiterSettings::default(), GateSettings::default());

        assert!(matches!(
            gate.evaluate(&request(Method::POST, "/api/goals")).await,
            GateOutcome::Admitted { .. }
        ));
        assert!(matches!(
            gate.evaluate(&request(Method::POST, "/api/goals")).await,
            GateOutcome::Rejected(_)
        ));
        match gate.evaluate(&request(Method::GET, "/api/goals")).await {
            GateOutcome::Admitted { scope, decision } => {
                assert_eq!(scope.kind(), SubjectKind::Ip);
                assert_eq!(scope.operation(), OperationClass::Read);
                assert_eq!(decision.remaining, 1);
            }
            other => panic!("expected admission, got {:?}", other),
        }
    }
}
