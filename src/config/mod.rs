use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::engine::CacheConfig;
use crate::rights::RetryPolicy;

/// Engine and orchestrator configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "custodian")]
#[command(about = "Attribute-based access decision engine and rights-case orchestrator")]
pub struct Config {
    /// Path to the initial policy YAML file
    #[arg(long, default_value = "policy.yaml", env = "CUSTODIAN_POLICY_PATH")]
    pub policy_path: PathBuf,

    /// Path to the audit log file (optional, in-memory sink if not set)
    #[arg(long, env = "CUSTODIAN_AUDIT_PATH")]
    pub audit_path: Option<PathBuf>,

    /// Enable the decision cache
    #[arg(long, default_value = "true", env = "CUSTODIAN_CACHE_ENABLED")]
    pub cache_enabled: bool,

    /// Decision cache time-to-live in seconds
    #[arg(long, default_value = "30", env = "CUSTODIAN_CACHE_TTL_SECS")]
    pub cache_ttl_secs: u64,

    /// Maximum cached decisions
    #[arg(long, default_value = "10000", env = "CUSTODIAN_CACHE_CAPACITY")]
    pub cache_capacity: usize,

    /// Hard attempt ceiling per collaborator subtask
    #[arg(long, default_value = "3", env = "CUSTODIAN_RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: u32,

    /// Base backoff delay between subtask attempts in milliseconds
    #[arg(long, default_value = "100", env = "CUSTODIAN_RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,

    /// Backoff delay ceiling in milliseconds
    #[arg(long, default_value = "5000", env = "CUSTODIAN_RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache_enabled,
            ttl: self.cache_ttl(),
            capacity: self.cache_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            policy_path: PathBuf::from("policy.yaml"),
            audit_path: None,
            cache_enabled: true,
            cache_ttl_secs: 30,
            cache_capacity: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
            log_level: "info".to_string(),
        }
    }
}
