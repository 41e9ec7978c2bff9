//! In-process user repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::application::repos::{RepoError, UsersRepo, UsersWriteRepo};
use crate::domain::entities::UserRecord;
use crate::domain::users::{NewUser, UserPatch};

const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Default)]
struct State {
    next_id: i64,
    users: BTreeMap<i64, UserRecord>,
}

impl State {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|user| user.email == email && Some(user.id) != except)
    }
}

/// Users held in a map behind a single lock. Each write is atomic with its
/// version bump because both happen under the same write guard.
#[derive(Default)]
pub struct InMemoryUsers {
    state: RwLock<State>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsersRepo for InMemoryUsers {
    async fn load(&self, id: i64) -> Result<UserRecord, RepoError> {
        self.state
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn list(&self, limit: u32, offset: u64) -> Result<Vec<UserRecord>, RepoError> {
        let state = self.state.read().await;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(state
            .users
            .values()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64, RepoError> {
        Ok(self.state.read().await.users.len() as u64)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[async_trait]
impl UsersWriteRepo for InMemoryUsers {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepoError> {
        let mut state = self.state.write().await;
        if state.email_taken(&user.email, None) {
            return Err(RepoError::Duplicate {
                constraint: EMAIL_CONSTRAINT.to_string(),
            });
        }

        state.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let record = UserRecord {
            id: state.next_id,
            name: user.name,
            email: user.email,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn mutate(&self, id: i64, patch: UserPatch) -> Result<UserRecord, RepoError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        if let Some(email) = patch.email.as_deref()
            && state.email_taken(email, Some(id))
        {
            return Err(RepoError::Duplicate {
                constraint: EMAIL_CONSTRAINT.to_string(),
            });
        }

        let record = state.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(email) = patch.email {
            record.email = email;
        }
        record.version += 1;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), RepoError> {
        self.state
            .write()
            .await
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}
