//! Validator store: a bounded-latency, fail-open adapter over a cache backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::types::ResourceKey;
use crate::domain::validator::Validator;

use super::config::ValidatorCacheConfig;
use super::error::CacheError;
use super::keys::{ValidatorKey, namespace};

/// Raw key/value operations a cache service must provide.
///
/// Implementations may fail freely; [`ValidatorStore`] bounds their latency
/// and decides how failures degrade.
#[async_trait]
pub trait ValidatorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrite unconditionally with the given expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether a value was present. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `namespace`; returns the number removed.
    async fn clear(&self, namespace: &str) -> Result<u64, CacheError>;

    /// Count keys starting with `namespace`.
    async fn count(&self, namespace: &str) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Snapshot of cache state for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub connected: bool,
    pub entries: Option<u64>,
    pub ttl_seconds: u64,
    pub max_ttl_seconds: u64,
}

#[derive(Clone)]
pub struct ValidatorStore {
    backend: Arc<dyn ValidatorBackend>,
    config: Arc<ValidatorCacheConfig>,
}

impl ValidatorStore {
    pub fn new(backend: Arc<dyn ValidatorBackend>, config: ValidatorCacheConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ValidatorCacheConfig {
        &self.config
    }

    pub fn key(&self, resource: &ResourceKey) -> ValidatorKey {
        ValidatorKey::new(&self.config.key_prefix, resource)
    }

    /// Current cached validator, or `None` when absent, unparsable, or the
    /// backend failed. Never serves a value it could not read back intact.
    pub async fn get(&self, resource: &ResourceKey) -> Option<Validator> {
        let key = self.key(resource);
        let raw = match self.guarded("get", self.backend.get(key.as_str())).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key = %key, error = %err, "validator lookup failed; treating as absent");
                return None;
            }
        };

        match Validator::parse(&raw) {
            Some(validator) => {
                debug!(key = %key, validator = %validator, "validator cache hit");
                Some(validator)
            }
            None => {
                warn!(key = %key, raw = %raw, "discarding malformed cached validator");
                None
            }
        }
    }

    /// Store `validator` for `resource`, replacing any previous value.
    pub async fn set(
        &self,
        resource: &ResourceKey,
        validator: &Validator,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let key = self.key(resource);
        let ttl = self.config.effective_ttl(ttl);
        self.guarded(
            "set",
            self.backend.set(key.as_str(), validator.as_str(), ttl),
        )
        .await?;
        debug!(key = %key, validator = %validator, ttl_secs = ttl.as_secs(), "validator cached");
        Ok(())
    }

    /// Remove the validator for `resource`. Idempotent.
    pub async fn delete(&self, resource: &ResourceKey) -> Result<(), CacheError> {
        let key = self.key(resource);
        let existed = self
            .guarded("delete", self.backend.delete(key.as_str()))
            .await?;
        debug!(key = %key, existed, "validator deleted");
        Ok(())
    }

    /// Drop every validator in this store's namespace.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let removed = self
            .guarded(
                "clear",
                self.backend.clear(&namespace(&self.config.key_prefix)),
            )
            .await?;
        debug!(removed, "validator cache cleared");
        Ok(removed)
    }

    pub async fn health(&self) -> Result<(), CacheError> {
        self.guarded("ping", self.backend.ping()).await
    }

    pub async fn stats(&self) -> CacheStats {
        let connected = self.health().await.is_ok();
        let entries = if connected {
            self.guarded(
                "count",
                self.backend.count(&namespace(&self.config.key_prefix)),
            )
            .await
            .ok()
        } else {
            None
        };

        CacheStats {
            backend: self.backend.name(),
            connected,
            entries,
            ttl_seconds: self.config.default_ttl.as_secs(),
            max_ttl_seconds: self.config.max_ttl.as_secs(),
        }
    }

    async fn guarded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        let timeout = self.config.op_timeout;
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout)),
        };

        if let Err(err) = &result {
            let kind = match err {
                CacheError::Timeout(_) => "timeout",
                CacheError::Unavailable(_) => "unavailable",
            };
            counter!(
                "etagger_validator_store_errors_total",
                "op" => op,
                "kind" => kind,
                "backend" => self.backend.name()
            )
            .increment(1);
        }

        result
    }
}
