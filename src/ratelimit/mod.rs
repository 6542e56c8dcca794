//! Rate limiting logic and state management.

mod limiter;
mod policy;
mod scope;
mod window;

pub use limiter::{spawn_cleanup_task, Decision, LimiterSettings, RateLimiter};
pub use policy::{LimitPolicy, OperationLimits, PolicyResolver, PolicyTable, Role, Tier, TierScaling};
pub use scope::{OperationClass, Scope, SubjectKind, ANONYMOUS_SUBJECT};
pub use window::TimeWindow;
