//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;

use super::types::ResourceKey;

/// A stored user.
///
/// `version` starts at 1 and is bumped by the repository on every mutation,
/// atomically with the content change. Validators are derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::user(self.id)
    }
}
