//! Validator cache configuration.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_OP_TIMEOUT_MS: u64 = 250;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_KEY_PREFIX: &str = "etag";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackendKind {
    /// In-process LRU; validators are lost on restart.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis,
}

impl CacheBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!(
                "unknown cache backend `{other}` (expected `memory` or `redis`)"
            )),
        }
    }
}

/// Validator cache configuration resolved from settings.
#[derive(Debug, Clone)]
pub struct ValidatorCacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    /// TTL applied when a caller does not request one.
    pub default_ttl: Duration,
    /// Upper bound on any entry's lifetime; bounds the degraded-invalidation window.
    pub max_ttl: Duration,
    /// Deadline for every backend call.
    pub op_timeout: Duration,
    /// Maximum entries held by the in-memory backend.
    pub memory_capacity: usize,
    pub key_prefix: String,
}

impl Default for ValidatorCacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: None,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_ttl: Duration::from_secs(DEFAULT_MAX_TTL_SECS),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl From<&crate::config::CacheSettings> for ValidatorCacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            default_ttl: settings.ttl,
            max_ttl: settings.max_ttl,
            op_timeout: settings.op_timeout,
            memory_capacity: settings.memory_capacity.get(),
            key_prefix: settings.key_prefix.clone(),
        }
    }
}

impl ValidatorCacheConfig {
    /// TTL for a new entry: the requested or default TTL, clamped to
    /// `[1s, max_ttl]`. Entries are never stored without expiry.
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Duration {
        let ttl = requested.unwrap_or(self.default_ttl).min(self.max_ttl);
        ttl.max(Duration::from_secs(1))
    }

    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
