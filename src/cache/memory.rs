//! In-process validator backend.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;

use super::config::ValidatorCacheConfig;
use super::error::CacheError;
use super::lock::lock_recovering;
use super::store::ValidatorBackend;

const TARGET: &str = "cache::memory";

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// LRU map with per-entry expiry. Expired entries are dropped lazily on access.
pub struct MemoryBackend {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryBackend {
    pub fn new(config: &ValidatorCacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    fn live_keys(&self, namespace: &str) -> (Vec<String>, Vec<String>) {
        let now = Instant::now();
        let entries = lock_recovering(&self.entries, TARGET, "live_keys");
        entries
            .iter()
            .filter(|(key, _)| key.starts_with(namespace))
            .fold((Vec::new(), Vec::new()), |(mut live, mut expired), (key, entry)| {
                if entry.is_live(now) {
                    live.push(key.clone());
                } else {
                    expired.push(key.clone());
                }
                (live, expired)
            })
    }
}

#[async_trait]
impl ValidatorBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut entries = lock_recovering(&self.entries, TARGET, "get");
        let cached = entries
            .get(key)
            .map(|entry| (entry.is_live(now), entry.value.clone()));
        match cached {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        lock_recovering(&self.entries, TARGET, "set").put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let removed = lock_recovering(&self.entries, TARGET, "delete").pop(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn clear(&self, namespace: &str) -> Result<u64, CacheError> {
        let (live, expired) = self.live_keys(namespace);
        let mut entries = lock_recovering(&self.entries, TARGET, "clear");
        for key in live.iter().chain(expired.iter()) {
            entries.pop(key);
        }
        Ok(live.len() as u64)
    }

    async fn count(&self, namespace: &str) -> Result<u64, CacheError> {
        let (live, _) = self.live_keys(namespace);
        Ok(live.len() as u64)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn backend(capacity: usize) -> MemoryBackend {
        MemoryBackend::new(&ValidatorCacheConfig {
            memory_capacity: capacity,
            ..Default::default()
        })
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let backend = backend(8);
        backend.set("etag:user:1", "\"a\"", MINUTE).await.expect("set");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(backend.get("etag:user:1").await, Ok(Some("\"a\"".to_string())));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.get("etag:user:1").await, Ok(None));
        assert_eq!(backend.count("etag:").await, Ok(0));
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let backend = backend(8);
        assert_eq!(backend.delete("etag:user:1").await, Ok(false));
        backend.set("etag:user:1", "\"a\"", MINUTE).await.expect("set");
        assert_eq!(backend.delete("etag:user:1").await, Ok(true));
    }

    #[tokio::test]
    async fn lru_eviction() {
        let backend = backend(2);
        backend.set("etag:user:1", "\"1\"", MINUTE).await.expect("set");
        backend.set("etag:user:2", "\"2\"", MINUTE).await.expect("set");

        // Touch 1 so that 2 becomes least recently used.
        assert!(backend.get("etag:user:1").await.expect("get").is_some());
        backend.set("etag:user:3", "\"3\"", MINUTE).await.expect("set");

        assert!(backend.get("etag:user:1").await.expect("get").is_some());
        assert!(backend.get("etag:user:2").await.expect("get").is_none());
        assert!(backend.get("etag:user:3").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn recovers_from_poisoned_lock() {
        let backend = backend(8);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = backend
                .entries
                .lock()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        backend.set("etag:user:1", "\"a\"", MINUTE).await.expect("set");
        assert!(backend.get("etag:user:1").await.expect("get").is_some());
    }
}
