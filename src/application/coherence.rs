//! Coherence engine: conditional reads and write-then-invalidate writes.
//!
//! Read path: look up the cached validator; if the client already holds it,
//! answer "not modified" without touching the repository. Otherwise load the
//! record, generate a fresh validator, overwrite the cache entry and return
//! the full payload.
//!
//! Write path: commit to the repository first, then delete the cached
//! validator. A failed delete does not fail the write; it is reported as a
//! degraded invalidation and the entry lives at most until its TTL.
//!
//! Cache failures never change the payload returned, only latency.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::ValidatorStore;
use crate::domain::entities::UserRecord;
use crate::domain::error::DomainError;
use crate::domain::types::ResourceKey;
use crate::domain::users::{NewUser, UserPatch};
use crate::domain::validator::{ConditionalTokens, Validator};

use super::observer::{NoopObserver, Outcome, OutcomeObserver};
use super::repos::{RepoError, UsersRepo, UsersStore, UsersWriteRepo};
use super::validator::{GenerationError, ValidatorGenerator};

#[derive(Debug, Error)]
pub enum CoherenceError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Repository(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The client's copy is current. Carries the matching cached validator.
    NotModified { validator: Validator },
    Full {
        record: UserRecord,
        validator: Validator,
    },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Update(UserPatch),
    Delete,
}

impl Mutation {
    fn validate(self) -> Result<Self, DomainError> {
        match self {
            Self::Update(patch) => patch.validate().map(Self::Update),
            Self::Delete => Ok(Self::Delete),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Update(_) => "update",
            Self::Delete => "delete",
        }
    }
}

/// Whether the cached validator was removed after a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    Completed,
    /// The store could not be reached; a stale entry may survive until it expires.
    Degraded,
}

impl Invalidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied {
        /// The updated record; `None` after a delete.
        record: Option<UserRecord>,
        /// Validator the next read will produce; not cached by the write.
        validator_hint: Option<Validator>,
        invalidation: Invalidation,
    },
    NotFound,
    Rejected(DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created {
        record: UserRecord,
        validator: Validator,
    },
    Rejected(DomainError),
}

#[derive(Clone)]
pub struct CoherenceEngine {
    repo: Arc<dyn UsersStore>,
    store: ValidatorStore,
    generator: ValidatorGenerator,
    observer: Arc<dyn OutcomeObserver>,
}

impl CoherenceEngine {
    pub fn new(
        repo: Arc<dyn UsersStore>,
        store: ValidatorStore,
        generator: ValidatorGenerator,
    ) -> Self {
        Self {
            repo,
            store,
            generator,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn OutcomeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &ValidatorStore {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn UsersStore> {
        &self.repo
    }

    pub fn generator(&self) -> &ValidatorGenerator {
        &self.generator
    }

    /// Answer a (possibly conditional) read of user `id`.
    #[instrument(skip(self, tokens), fields(key = %ResourceKey::user(id)))]
    pub async fn read(
        &self,
        id: i64,
        tokens: &ConditionalTokens,
    ) -> Result<ReadOutcome, CoherenceError> {
        let key = ResourceKey::user(id);

        let cached = self.store.get(&key).await;
        if let Some(current) = cached.as_ref().filter(|current| tokens.matches(current)) {
            debug!(validator = %current, "conditional read satisfied from cache");
            self.observer.observe(&key, Outcome::Hit);
            return Ok(ReadOutcome::NotModified {
                validator: current.clone(),
            });
        }

        let record = match self.repo.load(id).await {
            Ok(record) => record,
            Err(RepoError::NotFound) => {
                if cached.is_some() {
                    self.evict_orphan(&key).await;
                }
                self.observer.observe(&key, Outcome::Miss);
                return Ok(ReadOutcome::NotFound);
            }
            Err(err) => return Err(err.into()),
        };

        let fresh = self.generator.generate(&key, &record)?;

        if let Err(err) = self.store.set(&key, &fresh, None).await {
            warn!(error = %err, validator = %fresh, "validator refresh skipped");
        }
        self.observer.observe(&key, Outcome::Miss);

        Ok(ReadOutcome::Full {
            record,
            validator: fresh,
        })
    }

    /// Apply `mutation` to user `id`, then invalidate its cached validator.
    #[instrument(skip(self, mutation), fields(key = %ResourceKey::user(id), op = mutation.label()))]
    pub async fn write(&self, id: i64, mutation: Mutation) -> Result<WriteOutcome, CoherenceError> {
        let key = ResourceKey::user(id);

        let mutation = match mutation.validate() {
            Ok(mutation) => mutation,
            Err(err) => return Ok(WriteOutcome::Rejected(err)),
        };

        let committed = match mutation {
            Mutation::Update(patch) => self.repo.mutate(id, patch).await.map(Some),
            Mutation::Delete => self.repo.delete(id).await.map(|()| None),
        };

        let record = match committed {
            Ok(record) => record,
            Err(RepoError::NotFound) => return Ok(WriteOutcome::NotFound),
            Err(err) if err.is_rejection() => return Ok(WriteOutcome::Rejected(rejection(err))),
            Err(err) => return Err(err.into()),
        };

        let invalidation = self.invalidate(&key).await;

        let validator_hint = record.as_ref().and_then(|record| {
            self.generator
                .generate(&key, record)
                .inspect_err(|err| warn!(error = %err, "validator hint unavailable"))
                .ok()
        });

        Ok(WriteOutcome::Applied {
            record,
            validator_hint,
            invalidation,
        })
    }

    /// Create a user and prime the cache with its first validator.
    #[instrument(skip_all)]
    pub async fn create(&self, user: NewUser) -> Result<CreateOutcome, CoherenceError> {
        let user = match user.validate() {
            Ok(user) => user,
            Err(err) => return Ok(CreateOutcome::Rejected(err)),
        };

        let record = match self.repo.create(user).await {
            Ok(record) => record,
            Err(err) if err.is_rejection() => return Ok(CreateOutcome::Rejected(rejection(err))),
            Err(err) => return Err(err.into()),
        };

        let key = record.key();
        let validator = self.generator.generate(&key, &record)?;
        if let Err(err) = self.store.set(&key, &validator, None).await {
            warn!(key = %key, error = %err, "validator priming skipped");
        }

        Ok(CreateOutcome::Created { record, validator })
    }

    async fn invalidate(&self, key: &ResourceKey) -> Invalidation {
        match self.store.delete(key).await {
            Ok(()) => {
                self.observer.observe(key, Outcome::WriteInvalidate);
                Invalidation::Completed
            }
            Err(err) => {
                warn!(
                    key = %key,
                    error = %err,
                    max_ttl_secs = self.store.config().max_ttl.as_secs(),
                    "degraded invalidation: write committed but cached validator may be stale until expiry"
                );
                self.observer.observe(key, Outcome::DegradedInvalidate);
                Invalidation::Degraded
            }
        }
    }

    /// Drop a cached validator whose record no longer exists.
    async fn evict_orphan(&self, key: &ResourceKey) {
        if let Err(err) = self.store.delete(key).await {
            warn!(key = %key, error = %err, "failed to evict validator for missing record");
        }
    }
}

fn rejection(err: RepoError) -> DomainError {
    match err {
        RepoError::Duplicate { constraint } if constraint.contains("email") => {
            DomainError::validation("email", "already in use")
        }
        RepoError::Duplicate { constraint } => {
            DomainError::validation("record", format!("duplicate value for `{constraint}`"))
        }
        RepoError::InvalidInput { message } => DomainError::validation("record", message),
        other => DomainError::invariant(other.to_string()),
    }
}
