use std::time::Duration;

use thiserror::Error;

/// Failure talking to the validator cache. Never surfaced to HTTP callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("validator cache unavailable: {0}")]
    Unavailable(String),
    #[error("validator cache operation timed out after {0:?}")]
    Timeout(Duration),
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}
