//! Redis validator backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::info;

use crate::config::mask_credentials;

use super::error::CacheError;
use super::store::ValidatorBackend;

const SCAN_BATCH: usize = 500;

/// Validators stored as plain strings with `SET … EX`.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
}

impl RedisBackend {
    /// Connect to `url`, giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(CacheError::unavailable)?;
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
            .map_err(CacheError::unavailable)?;

        info!(url = %mask_credentials(url), "redis validator cache connected");
        Ok(Self { connection })
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    async fn scan(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection();
        let pattern = format!("{}*", escape_glob(namespace));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(map_redis)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl ValidatorBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await.map_err(map_redis)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await.map_err(map_redis)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let removed: i64 = conn.del(key).await.map_err(map_redis)?;
        Ok(removed > 0)
    }

    async fn clear(&self, namespace: &str) -> Result<u64, CacheError> {
        let keys = self.scan(namespace).await?;
        let mut removed: u64 = 0;
        let mut conn = self.connection();
        for chunk in keys.chunks(SCAN_BATCH) {
            let count: i64 = conn.del(chunk).await.map_err(map_redis)?;
            removed += u64::try_from(count).unwrap_or(0);
        }
        Ok(removed)
    }

    async fn count(&self, namespace: &str) -> Result<u64, CacheError> {
        Ok(self.scan(namespace).await?.len() as u64)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;
        Ok(())
    }
}

/// Escape `SCAN MATCH` metacharacters so `namespace` only matches itself.
fn escape_glob(namespace: &str) -> String {
    let mut escaped = String::with_capacity(namespace.len());
    for ch in namespace.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn map_redis(err: RedisError) -> CacheError {
    if err.is_timeout() {
        CacheError::Unavailable(format!("redis timeout: {err}"))
    } else {
        CacheError::unavailable(err)
    }
}
