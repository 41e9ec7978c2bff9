//! Per-request outcome signal consumed by an external metrics collector.

use crate::domain::types::ResourceKey;

/// What the coherence engine did for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// A cached validator matched the client's condition; no repository access.
    Hit,
    /// The repository was consulted and the cache refreshed.
    Miss,
    /// A write committed and its cached validator was deleted.
    WriteInvalidate,
    /// A write committed but the cached validator could not be deleted.
    DegradedInvalidate,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::Hit,
        Outcome::Miss,
        Outcome::WriteInvalidate,
        Outcome::DegradedInvalidate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::WriteInvalidate => "write-invalidate",
            Self::DegradedInvalidate => "degraded-invalidate",
        }
    }
}

/// Fire-and-forget sink for outcomes. Implementations must not block or fail.
pub trait OutcomeObserver: Send + Sync {
    fn observe(&self, key: &ResourceKey, outcome: Outcome);
}

/// Discards every outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl OutcomeObserver for NoopObserver {
    fn observe(&self, _key: &ResourceKey, _outcome: Outcome) {}
}
