//! Limit policies and their resolution.
//!
//! A [`PolicyTable`] holds one base [`LimitPolicy`] per operation class plus
//! a percentage scale per caller tier. [`PolicyResolver::resolve`] combines
//! the two; it is pure and does no I/O.

use serde::{Deserialize, Serialize};

use super::scope::{OperationClass, SubjectKind};
use super::window::TimeWindow;
use crate::error::{HivegateError, Result};

/// Quota applied to one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    /// Requests allowed per minute window
    pub per_minute: u64,
    /// Requests allowed per hour window
    pub per_hour: u64,
    /// Requests allowed within a single second
    pub burst_capacity: u64,
}

impl LimitPolicy {
    pub const fn new(per_minute: u64, per_hour: u64, burst_capacity: u64) -> Self {
        Self {
            per_minute,
            per_hour,
            burst_capacity,
        }
    }

    /// Limit for a window.
    pub fn limit_for(&self, window: TimeWindow) -> u64 {
        match window {
            TimeWindow::Burst => self.burst_capacity,
            TimeWindow::Minute => self.per_minute,
            TimeWindow::Hour => self.per_hour,
        }
    }

    fn scaled(&self, percent: u32) -> Self {
        let scale = |value: u64| (value.saturating_mul(percent as u64) / 100).max(1);
        Self {
            per_minute: scale(self.per_minute),
            per_hour: scale(self.per_hour),
            burst_capacity: scale(self.burst_capacity),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.per_minute == 0 || self.per_hour == 0 || self.burst_capacity == 0 {
            return Err(HivegateError::Config(format!(
                "policy '{}' must have positive limits",
                name
            )));
        }
        if self.per_hour < self.per_minute {
            return Err(HivegateError::Config(format!(
                "policy '{}' allows fewer requests per hour ({}) than per minute ({})",
                name, self.per_hour, self.per_minute
            )));
        }
        Ok(())
    }
}

/// Base policy per operation class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLimits {
    #[serde(default = "default_public")]
    pub public: LimitPolicy,
    #[serde(default = "default_read")]
    pub read: LimitPolicy,
    #[serde(default = "default_write")]
    pub write: LimitPolicy,
    #[serde(default = "default_admin")]
    pub admin: LimitPolicy,
}

impl Default for OperationLimits {
    fn default() -> Self {
        Self {
            public: default_public(),
            read: default_read(),
            write: default_write(),
            admin: default_admin(),
        }
    }
}

fn default_public() -> LimitPolicy {
    LimitPolicy::new(30, 600, 10)
}

fn default_read() -> LimitPolicy {
    LimitPolicy::new(60, 3600, 10)
}

fn default_write() -> LimitPolicy {
    LimitPolicy::new(20, 600, 5)
}

fn default_admin() -> LimitPolicy {
    LimitPolicy::new(10, 300, 3)
}

impl OperationLimits {
    pub fn get(&self, operation: OperationClass) -> &LimitPolicy {
        match operation {
            OperationClass::Public => &self.public,
            OperationClass::Read => &self.read,
            OperationClass::Write => &self.write,
            OperationClass::Admin => &self.admin,
        }
    }
}

/// Caller tier, in descending precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Admin,
    Authenticated,
    Anonymous,
    Public,
}

/// Role carried by the caller's already-validated claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Holds the admin role
    Admin,
    /// Authenticated without elevated roles
    Member,
    /// No authenticated subject
    #[default]
    Guest,
}

/// Percentage applied to the base policy for each tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierScaling {
    #[serde(default = "default_admin_percent")]
    pub admin: u32,
    #[serde(default = "default_full_percent")]
    pub authenticated: u32,
    #[serde(default = "default_anonymous_percent")]
    pub anonymous: u32,
    #[serde(default = "default_full_percent")]
    pub public: u32,
}

impl Default for TierScaling {
    fn default() -> Self {
        Self {
            admin: default_admin_percent(),
            authenticated: default_full_percent(),
            anonymous: default_anonymous_percent(),
            public: default_full_percent(),
        }
    }
}

fn default_admin_percent() -> u32 {
    200
}

fn default_full_percent() -> u32 {
    100
}

fn default_anonymous_percent() -> u32 {
    50
}

impl TierScaling {
    /// Every tier gets exactly the base policy.
    pub fn flat() -> Self {
        Self {
            admin: 100,
            authenticated: 100,
            anonymous: 100,
            public: 100,
        }
    }

    fn percent(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Admin => self.admin,
            Tier::Authenticated => self.authenticated,
            Tier::Anonymous => self.anonymous,
            Tier::Public => self.public,
        }
    }
}

/// The static policy table, loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    pub operations: OperationLimits,
    #[serde(default)]
    pub tiers: TierScaling,
}

impl PolicyTable {
    /// Reject tables that could never admit a request or contradict themselves.
    pub fn validate(&self) -> Result<()> {
        self.operations.public.validate("public")?;
        self.operations.read.validate("read")?;
        self.operations.write.validate("write")?;
        self.operations.admin.validate("admin")?;

        let tiers = &self.tiers;
        for (name, percent) in [
            ("admin", tiers.admin),
            ("authenticated", tiers.authenticated),
            ("anonymous", tiers.anonymous),
            ("public", tiers.public),
        ] {
            if percent == 0 {
                return Err(HivegateError::Config(format!(
                    "tier '{}' scale must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Maps identity class and operation class to a concrete policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyResolver {
    table: PolicyTable,
}

impl PolicyResolver {
    /// Create a resolver over a validated table.
    pub fn new(table: PolicyTable) -> Result<Self> {
        table.validate()?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// Determine the caller tier.
    ///
    /// An admin role wins over everything, then an authenticated subject.
    /// Unauthenticated callers, whether identified by address or not at all,
    /// share the anonymous tier except on public operations.
    pub fn tier(kind: SubjectKind, role: Role, operation: OperationClass) -> Tier {
        if role == Role::Admin || kind == SubjectKind::Admin {
            return Tier::Admin;
        }
        if role == Role::Member || kind == SubjectKind::User {
            return Tier::Authenticated;
        }
        if operation == OperationClass::Public {
            return Tier::Public;
        }
        Tier::Anonymous
    }

    /// Resolve the policy for a caller and operation.
    pub fn resolve(&self, kind: SubjectKind, role: Role, operation: OperationClass) -> LimitPolicy {
        let tier = Self::tier(kind, role, operation);
        let base = self.table.operations.get(operation);
        base.scaled(self.table.tiers.percent(tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        assert!(PolicyTable::default().validate().is_ok());
    }

    #[test]
    fn test_write_and_admin_are_stricter_than_read() {
        let resolver = PolicyResolver::default();
        let read = resolver.resolve(SubjectKind::User, Role::Member, OperationClass::Read);
        let write = resolver.resolve(SubjectKind::User, Role::Member, OperationClass::Write);
        let admin = resolver.resolve(SubjectKind::User, Role::Member, OperationClass::Admin);

        assert!(write.per_minute < read.per_minute);
        assert!(admin.per_minute < read.per_minute);
        assert!(write.per_hour < read.per_hour);
    }

    #[test]
    fn test_tier_precedence() {
        use OperationClass::*;

        assert_eq!(PolicyResolver::tier(SubjectKind::User, Role::Admin, Read), Tier::Admin);
        assert_eq!(PolicyResolver::tier(SubjectKind::Admin, Role::Guest, Public), Tier::Admin);
        assert_eq!(PolicyResolver::tier(SubjectKind::User, Role::Member, Public), Tier::Authenticated);
        assert_eq!(PolicyResolver::tier(SubjectKind::Ip, Role::Guest, Write), Tier::Anonymous);
        assert_eq!(PolicyResolver::tier(SubjectKind::Ip, Role::Guest, Public), Tier::Public);
        assert_eq!(PolicyResolver::tier(SubjectKind::Anonymous, Role::Guest, Read), Tier::Anonymous);
        assert_eq!(PolicyResolver::tier(SubjectKind::Anonymous, Role::Guest, Public), Tier::Public);
    }

    #[test]
    fn test_unidentified_caller_never_outranks_known_address() {
        let resolver = PolicyResolver::default();

        for operation in [OperationClass::Read, OperationClass::Write, OperationClass::Admin] {
            let anonymous = resolver.resolve(SubjectKind::Anonymous, Role::Guest, operation);
            let ip = resolver.resolve(SubjectKind::Ip, Role::Guest, operation);
            let user = resolver.resolve(SubjectKind::User, Role::Member, operation);

            assert_eq!(anonymous, ip);
            assert!(anonymous.per_minute < user.per_minute);
        }

        let write = resolver.resolve(SubjectKind::Anonymous, Role::Guest, OperationClass::Write);
        assert_eq!(write, LimitPolicy::new(10, 300, 2));
    }

    #[test]
    fn test_tier_scaling_applies() {
        let resolver = PolicyResolver::default();

        let admin = resolver.resolve(SubjectKind::Admin, Role::Admin, OperationClass::Read);
        assert_eq!(admin, LimitPolicy::new(120, 7200, 20));

        let user = resolver.resolve(SubjectKind::User, Role::Member, OperationClass::Read);
        assert_eq!(user, LimitPolicy::new(60, 3600, 10));

        let ip = resolver.resolve(SubjectKind::Ip, Role::Guest, OperationClass::Read);
        assert_eq!(ip, LimitPolicy::new(30, 1800, 5));
    }

    #[test]
    fn test_scaling_never_reaches_zero() {
        let table = PolicyTable {
            operations: OperationLimits {
                admin: LimitPolicy::new(1, 1, 1),
                ..Default::default()
            },
            tiers: TierScaling {
                anonymous: 10,
                ..Default::default()
            },
        };
        let resolver = PolicyResolver::new(table).unwrap();
        let policy = resolver.resolve(SubjectKind::Ip, Role::Guest, OperationClass::Admin);
        assert_eq!(policy, LimitPolicy::new(1, 1, 1));
    }

    #[test]
    fn test_parse_partial_table() {
        let yaml = r#"
operations:
  write:
    per_minute: 5
    per_hour: 50
    burst_capacity: 2
tiers:
  anonymous: 25
"#;
        let table: PolicyTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.operations.write, LimitPolicy::new(5, 50, 2));
        assert_eq!(table.operations.read, default_read());
        assert_eq!(table.tiers.anonymous, 25);
        assert_eq!(table.tiers.admin, 200);
    }

    #[test]
    fn test_negative_limit_rejected_at_parse() {
        let yaml = r#"
operations:
  read:
    per_minute: -1
    per_hour: 100
    burst_capacity: 1
"#;
        assert!(serde_yaml::from_str::<PolicyTable>(yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_tables() {
        let mut table = PolicyTable::default();
        table.operations.read = LimitPolicy::new(0, 100, 1);
        assert!(matches!(PolicyResolver::new(table), Err(HivegateError::Config(_))));

        let mut table = PolicyTable::default();
        table.operations.write = LimitPolicy::new(100, 10, 1);
        assert!(table.validate().is_err());

        let mut table = PolicyTable::default();
        table.tiers.public = 0;
        assert!(table.validate().is_err());
    }
}
