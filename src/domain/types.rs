//! Identity types shared across layers.

use std::fmt;

use serde::Serialize;

/// Resource kind for user records.
pub const USER_KIND: &str = "user";

/// Stable identity of a resource: its kind plus numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceKey {
    pub kind: &'static str,
    pub id: i64,
}

impl ResourceKey {
    pub fn new(kind: &'static str, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn user(id: i64) -> Self {
        Self::new(USER_KIND, id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
