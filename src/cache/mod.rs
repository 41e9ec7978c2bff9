//! Validator cache.
//!
//! Maps resource identity to the last validator generated for it. The store is
//! a performance aid only: every operation is bounded by a timeout and any
//! backend failure degrades to "unknown" instead of reaching the caller.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"            # or "memory"
//! redis_url = "redis://localhost:6379"
//! ttl_seconds = 86400
//! max_ttl_seconds = 86400
//! op_timeout_ms = 250
//! ```

mod config;
mod error;
mod keys;
pub(crate) mod lock;
mod memory;
mod redis_backend;
mod store;

pub use config::{CacheBackendKind, ValidatorCacheConfig};
pub use error::CacheError;
pub use keys::ValidatorKey;
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;
pub use store::{CacheStats, ValidatorBackend, ValidatorStore};
