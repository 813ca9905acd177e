use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Defaults ─────────────────────────────────────────────────────────

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;
pub const DEFAULT_CACHE_PREFIX: &str = "devflix-cache";
pub const DEFAULT_CACHE_SCHEMA_VERSION: &str = "v1";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

// ── Top-level config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between reconciliation passes.
    pub check_interval_secs: u64,
    /// Consecutive top-level pass failures before the loop pauses.
    pub error_threshold: u32,
    /// Seconds the loop stays paused before resuming automatically.
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Namespace prefix for session-storage keys.
    pub prefix: String,
    /// Running schema version; entries from other versions read as misses.
    pub schema_version: String,
    /// Default entry TTL in seconds.
    pub default_ttl_secs: u64,
    /// Optional byte quota for the in-memory session store.
    pub quota_bytes: Option<usize>,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            scheduler: SchedulerSettings {
                check_interval_secs: env_u64("DEVFLIX_CHECK_INTERVAL_SECS", DEFAULT_CHECK_INTERVAL_SECS),
                error_threshold: env_u32("DEVFLIX_ERROR_THRESHOLD", DEFAULT_ERROR_THRESHOLD),
                cooldown_secs: env_u64("DEVFLIX_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS),
            },
            cache: CacheSettings {
                prefix: env_or("DEVFLIX_CACHE_PREFIX", DEFAULT_CACHE_PREFIX),
                schema_version: env_or("DEVFLIX_CACHE_SCHEMA_VERSION", DEFAULT_CACHE_SCHEMA_VERSION),
                default_ttl_secs: env_u64("DEVFLIX_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
                quota_bytes: env_opt("DEVFLIX_CACHE_QUOTA_BYTES").and_then(|v| v.parse().ok()),
            },
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduler: interval={}s, error_threshold={}, cooldown={}s",
            self.scheduler.check_interval_secs,
            self.scheduler.error_threshold,
            self.scheduler.cooldown_secs
        );
        tracing::info!(
            "  cache:     prefix={}, schema={}, ttl={}s, quota={}",
            self.cache.prefix,
            self.cache.schema_version,
            self.cache.default_ttl_secs,
            self.cache
                .quota_bytes
                .map(|b| b.to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
    }
}
