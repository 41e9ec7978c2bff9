#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use etagger::application::coherence::{CoherenceEngine, CreateOutcome};
use etagger::application::repos::{RepoError, UsersRepo, UsersStore, UsersWriteRepo};
use etagger::application::validator::{EtagStrategy, ValidatorGenerator};
use etagger::cache::{
    CacheError, MemoryBackend, ValidatorBackend, ValidatorCacheConfig, ValidatorStore,
};
use etagger::domain::entities::UserRecord;
use etagger::domain::users::{NewUser, UserPatch};
use etagger::domain::validator::Validator;
use etagger::infra::memory::InMemoryUsers;

/// Memory backend that can be switched into a state where every call fails.
pub struct SwitchableBackend {
    inner: MemoryBackend,
    down: AtomicBool,
}

impl SwitchableBackend {
    pub fn new(config: &ValidatorCacheConfig) -> Self {
        Self {
            inner: MemoryBackend::new(config),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ValidatorBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "switchable"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn clear(&self, namespace: &str) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.clear(namespace).await
    }

    async fn count(&self, namespace: &str) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.count(namespace).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }
}

/// Repository whose reads and updates report version 0, a state no
/// validator may be generated from. Creates are stored normally.
#[derive(Default)]
pub struct ZeroVersionUsers {
    inner: InMemoryUsers,
}

fn zero_version(mut record: UserRecord) -> UserRecord {
    record.version = 0;
    record
}

#[async_trait]
impl UsersRepo for ZeroVersionUsers {
    async fn load(&self, id: i64) -> Result<UserRecord, RepoError> {
        self.inner.load(id).await.map(zero_version)
    }

    async fn list(&self, limit: u32, offset: u64) -> Result<Vec<UserRecord>, RepoError> {
        self.inner.list(limit, offset).await
    }

    async fn count(&self) -> Result<u64, RepoError> {
        self.inner.count().await
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.inner.health_check().await
    }
}

#[async_trait]
impl UsersWriteRepo for ZeroVersionUsers {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepoError> {
        self.inner.create(user).await
    }

    async fn mutate(&self, id: i64, patch: UserPatch) -> Result<UserRecord, RepoError> {
        self.inner.mutate(id, patch).await.map(zero_version)
    }

    async fn delete(&self, id: i64) -> Result<(), RepoError> {
        self.inner.delete(id).await
    }
}

pub struct Harness<R = InMemoryUsers> {
    pub engine: CoherenceEngine,
    pub repo: Arc<R>,
    pub backend: Arc<SwitchableBackend>,
}

pub fn harness(strategy: EtagStrategy) -> Harness {
    harness_over(strategy, Arc::new(InMemoryUsers::new()))
}

pub fn harness_over<R: UsersStore + 'static>(strategy: EtagStrategy, repo: Arc<R>) -> Harness<R> {
    let config = ValidatorCacheConfig::default();
    let backend = Arc::new(SwitchableBackend::new(&config));
    let store = ValidatorStore::new(backend.clone(), config);
    let engine = CoherenceEngine::new(repo.clone(), store, ValidatorGenerator::new(strategy));
    Harness {
        engine,
        repo,
        backend,
    }
}

pub fn new_user(name: &str, email: &str) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: email.to_string(),
    }
}

pub async fn create(engine: &CoherenceEngine, name: &str, email: &str) -> (UserRecord, Validator) {
    match engine
        .create(new_user(name, email))
        .await
        .expect("create should succeed")
    {
        CreateOutcome::Created { record, validator } => (record, validator),
        other => panic!("unexpected create outcome: {other:?}"),
    }
}
