//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::UserRecord;
use crate::domain::users::{NewUser, UserPatch};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// True for failures caused by the caller's input rather than the store.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Duplicate { .. } | Self::InvalidInput { .. })
    }
}

/// A page of users plus the total row count.
#[derive(Debug, Clone)]
pub struct UserPage {
    pub items: Vec<UserRecord>,
    pub total: u64,
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn load(&self, id: i64) -> Result<UserRecord, RepoError>;

    async fn list(&self, limit: u32, offset: u64) -> Result<Vec<UserRecord>, RepoError>;

    async fn count(&self) -> Result<u64, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;

    async fn page(&self, limit: u32, offset: u64) -> Result<UserPage, RepoError> {
        let items = self.list(limit, offset).await?;
        let total = self.count().await?;
        Ok(UserPage { items, total })
    }
}

/// Mutating repository operations.
///
/// Every successful `mutate` increments the record's `version` by exactly one
/// in the same atomic step as the content change.
#[async_trait]
pub trait UsersWriteRepo: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepoError>;

    async fn mutate(&self, id: i64, patch: UserPatch) -> Result<UserRecord, RepoError>;

    async fn delete(&self, id: i64) -> Result<(), RepoError>;
}

/// Convenience bound for adapters that implement both halves.
pub trait UsersStore: UsersRepo + UsersWriteRepo {}

impl<T> UsersStore for T where T: UsersRepo + UsersWriteRepo {}
