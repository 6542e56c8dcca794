//! Configuration management for Hivegate.
//!
//! Configuration is read once at startup and never changes afterwards.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HivegateError, Result};
use crate::ratelimit::{OperationClass, PolicyTable};
use crate::store::RedisStoreConfig;

/// Main configuration for the Hivegate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HivegateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Master switch; when off every request is admitted
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Denials that escalate a scope into a block
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u32,

    /// Lifetime of a scope's violation counter in seconds
    #[serde(default = "default_violation_ttl")]
    pub violation_ttl_secs: u64,

    /// Block cooldown in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// Interval between expired-counter sweeps in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Enforce the per-second burst capacity in the HTTP gate
    #[serde(default = "default_enabled")]
    pub enforce_burst: bool,

    /// Paths that bypass the gate (exact match or `/`-bounded prefix)
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// Operation classes that bypass the gate
    #[serde(default)]
    pub excluded_operations: Vec<OperationClass>,

    /// Path prefixes classified as ADMIN operations
    #[serde(default = "default_admin_prefixes")]
    pub admin_path_prefixes: Vec<String>,

    /// Path prefixes classified as PUBLIC operations
    #[serde(default = "default_public_prefixes")]
    pub public_path_prefixes: Vec<String>,

    /// Per-operation limits and tier scaling
    #[serde(default)]
    pub policies: PolicyTable,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            violation_threshold: default_violation_threshold(),
            violation_ttl_secs: default_violation_ttl(),
            block_duration_secs: default_block_duration(),
            cleanup_interval_secs: default_cleanup_interval(),
            enforce_burst: default_enabled(),
            excluded_paths: default_excluded_paths(),
            excluded_operations: Vec::new(),
            admin_path_prefixes: default_admin_prefixes(),
            public_path_prefixes: default_public_prefixes(),
            policies: PolicyTable::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_violation_threshold() -> u32 {
    3
}

fn default_violation_ttl() -> u64 {
    3600
}

fn default_block_duration() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_excluded_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}

fn default_admin_prefixes() -> Vec<String> {
    vec!["/api/admin".to_string(), "/admin".to_string()]
}

fn default_public_prefixes() -> Vec<String> {
    vec!["/api/public".to_string(), "/public".to_string()]
}

impl RateLimitingConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.violation_threshold == 0 {
            return Err(HivegateError::Config(
                "violation_threshold must be at least 1".to_string(),
            ));
        }
        for (name, secs) in [
            ("violation_ttl_secs", self.violation_ttl_secs),
            ("block_duration_secs", self.block_duration_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ] {
            if secs == 0 {
                return Err(HivegateError::Config(format!("{} must be positive", name)));
            }
        }
        self.policies.validate()
    }
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; counters are not shared between instances
    Memory,
    /// Shared Redis store
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every key written to Redis
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "hivegate".to_string()
}

fn default_command_timeout() -> u64 {
    250
}

impl StoreConfig {
    pub fn redis(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.redis_url.clone(),
            key_prefix: self.key_prefix.clone(),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            return Err(HivegateError::Config(
                "command_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl HivegateConfig {
    /// Load configuration from an optional file, overlaid with `HIVEGATE__*` environment variables.
    ///
    /// Nested keys use `__`, e.g. `HIVEGATE__RATE_LIMITING__ENABLED=false`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HIVEGATE")
                .prefix_separator("__")
                .separator("__"),
        );

        let config: HivegateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| HivegateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: HivegateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| HivegateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot be enforced.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()?;
        self.store.validate()
    }
}
