mod support;

use std::sync::Arc;

use etagger::application::coherence::{
    CoherenceError, Invalidation, Mutation, ReadOutcome, WriteOutcome,
};
use etagger::application::repos::UsersRepo;
use etagger::application::validator::{EtagStrategy, GenerationError};
use etagger::domain::types::ResourceKey;
use etagger::domain::users::UserPatch;
use etagger::domain::validator::{ConditionalTokens, Validator};

use support::{ZeroVersionUsers, create, harness, harness_over};

const STRATEGIES: [EtagStrategy; 2] = [EtagStrategy::Version, EtagStrategy::Hash];

fn rename(name: &str) -> Mutation {
    Mutation::Update(UserPatch {
        name: Some(name.to_string()),
        email: None,
    })
}

fn tokens(validator: &Validator) -> ConditionalTokens {
    ConditionalTokens::tags([validator.clone()])
}

#[tokio::test]
async fn conditional_read_lifecycle() {
    for strategy in STRATEGIES {
        let h = harness(strategy);
        let (created, _) = create(&h.engine, "Ada", "ada@example.com").await;
        assert_eq!((created.id, created.version), (1, 1));

        // Start from an empty cache so the first read is a genuine miss.
        h.engine.store().clear().await.expect("clear");

        let ReadOutcome::Full {
            record: c1,
            validator: v1,
        } = h
            .engine
            .read(1, &ConditionalTokens::none())
            .await
            .expect("read")
        else {
            panic!("first read must be full");
        };
        assert_eq!(c1, created);
        assert_eq!(
            h.engine.store().get(&ResourceKey::user(1)).await,
            Some(v1.clone())
        );

        assert_eq!(
            h.engine.read(1, &tokens(&v1)).await.expect("read"),
            ReadOutcome::NotModified {
                validator: v1.clone()
            }
        );

        let outcome = h.engine.write(1, rename("Ada L.")).await.expect("write");
        let WriteOutcome::Applied {
            record: Some(c2),
            invalidation: Invalidation::Completed,
            ..
        } = outcome.clone()
        else {
            panic!("unexpected write outcome: {outcome:?}");
        };
        assert_eq!(c2.version, 2);
        assert!(h.engine.store().get(&ResourceKey::user(1)).await.is_none());

        let ReadOutcome::Full {
            record,
            validator: v2,
        } = h.engine.read(1, &tokens(&v1)).await.expect("read")
        else {
            panic!("stale validator must never yield not-modified ({strategy:?})");
        };
        assert_eq!(record, c2);
        assert_ne!(v1, v2);

        assert_eq!(
            h.engine.read(1, &tokens(&v2)).await.expect("read"),
            ReadOutcome::NotModified { validator: v2 }
        );
    }
}

#[tokio::test]
async fn write_hint_matches_next_read() {
    let h = harness(EtagStrategy::Version);
    let (user, _) = create(&h.engine, "Grace", "grace@example.com").await;

    let WriteOutcome::Applied {
        validator_hint: Some(hint),
        ..
    } = h.engine.write(user.id, rename("Grace H.")).await.expect("write")
    else {
        panic!("update should apply");
    };

    // The hint is not cached by the write itself.
    assert!(h.engine.store().get(&user.key()).await.is_none());
    assert_eq!(
        h.engine.read(user.id, &tokens(&hint)).await.expect("read"),
        ReadOutcome::Full {
            record: h.repo.load(user.id).await.expect("load"),
            validator: hint.clone(),
        }
    );
    assert_eq!(
        h.engine.read(user.id, &tokens(&hint)).await.expect("read"),
        ReadOutcome::NotModified { validator: hint }
    );
}

#[tokio::test]
async fn wildcard_and_weak_tokens_match_current_validator() {
    let h = harness(EtagStrategy::Version);
    let (user, validator) = create(&h.engine, "Ada", "ada@example.com").await;

    assert!(matches!(
        h.engine
            .read(user.id, &ConditionalTokens::Any)
            .await
            .expect("read"),
        ReadOutcome::NotModified { .. }
    ));

    let weak = ConditionalTokens::parse(&format!("\"other\", {}", validator.to_weak()));
    assert!(matches!(
        h.engine.read(user.id, &weak).await.expect("read"),
        ReadOutcome::NotModified { .. }
    ));

    let unrelated = ConditionalTokens::parse("\"user-1-v99\"");
    assert!(matches!(
        h.engine.read(user.id, &unrelated).await.expect("read"),
        ReadOutcome::Full { .. }
    ));
}

#[tokio::test]
async fn reads_fail_open_when_cache_is_down() {
    for strategy in STRATEGIES {
        let h = harness(strategy);
        let (user, v1) = create(&h.engine, "Ada", "ada@example.com").await;

        h.backend.set_down(true);

        // A client holding the current validator still gets the full payload.
        let outcome = h.engine.read(user.id, &tokens(&v1)).await.expect("read");
        assert_eq!(
            outcome,
            ReadOutcome::Full {
                record: user.clone(),
                validator: v1.clone(),
            }
        );

        assert_eq!(
            h.engine
                .read(user.id + 1, &ConditionalTokens::Any)
                .await
                .expect("read"),
            ReadOutcome::NotFound
        );
    }
}

#[tokio::test]
async fn degraded_invalidation_commits_the_write() {
    let h = harness(EtagStrategy::Version);
    let (user, v1) = create(&h.engine, "Ada", "ada@example.com").await;

    h.backend.set_down(true);
    let outcome = h.engine.write(user.id, rename("Ada L.")).await.expect("write");
    let WriteOutcome::Applied {
        record: Some(updated),
        invalidation: Invalidation::Degraded,
        ..
    } = outcome.clone()
    else {
        panic!("unexpected write outcome: {outcome:?}");
    };
    assert_eq!(updated.version, 2);
    assert_eq!(h.repo.load(user.id).await.expect("load"), updated);

    // The stale entry survived; it is the bounded staleness window until TTL.
    h.backend.set_down(false);
    assert_eq!(h.engine.store().get(&user.key()).await, Some(v1.clone()));

    // The next miss overwrites it with the current validator.
    let ReadOutcome::Full { validator: v2, .. } = h
        .engine
        .read(user.id, &ConditionalTokens::none())
        .await
        .expect("read")
    else {
        panic!("unconditional read must be full");
    };
    assert_ne!(v1, v2);
    assert!(matches!(
        h.engine.read(user.id, &tokens(&v1)).await.expect("read"),
        ReadOutcome::Full { .. }
    ));
}

#[tokio::test]
async fn create_succeeds_while_cache_is_down() {
    let h = harness(EtagStrategy::Hash);
    h.backend.set_down(true);

    let (user, validator) = create(&h.engine, "Ada", "ada@example.com").await;
    assert_eq!(user.version, 1);

    h.backend.set_down(false);
    assert!(h.engine.store().get(&user.key()).await.is_none());
    assert_eq!(
        h.engine
            .read(user.id, &ConditionalTokens::none())
            .await
            .expect("read"),
        ReadOutcome::Full {
            record: user,
            validator,
        }
    );
}

#[tokio::test]
async fn concurrent_conditional_reads_agree() {
    let h = harness(EtagStrategy::Version);
    let (user, validator) = create(&h.engine, "Ada", "ada@example.com").await;

    let id = user.id;
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let engine = h.engine.clone();
        let validator = validator.clone();
        tasks.push(tokio::spawn(async move {
            engine.read(id, &tokens(&validator)).await
        }));
    }

    for task in tasks {
        let outcome = task.await.expect("join").expect("read");
        assert_eq!(
            outcome,
            ReadOutcome::NotModified {
                validator: validator.clone()
            }
        );
    }
}

#[tokio::test]
async fn malformed_version_fails_read_without_caching() {
    for strategy in STRATEGIES {
        let h = harness_over(strategy, Arc::new(ZeroVersionUsers::default()));
        let (user, _) = create(&h.engine, "Ada", "ada@example.com").await;
        h.engine.store().clear().await.expect("clear");

        let err = h
            .engine
            .read(user.id, &ConditionalTokens::none())
            .await
            .expect_err("version 0 cannot produce a validator");
        assert!(matches!(
            err,
            CoherenceError::Generation(GenerationError::InvalidVersion { version: 0, .. })
        ));
        assert!(h.engine.store().get(&user.key()).await.is_none());

        // A client echoing what a version-0 tag would look like is not answered from cache.
        let guessed = ConditionalTokens::parse("\"user-1-v0\"");
        assert!(matches!(
            h.engine.read(user.id, &guessed).await,
            Err(CoherenceError::Generation(_))
        ));
        assert!(h.engine.store().get(&user.key()).await.is_none());
    }
}

#[tokio::test]
async fn malformed_version_after_write_drops_only_the_hint() {
    let h = harness_over(EtagStrategy::Version, Arc::new(ZeroVersionUsers::default()));
    let (user, _) = create(&h.engine, "Ada", "ada@example.com").await;
    assert!(h.engine.store().get(&user.key()).await.is_some());

    let outcome = h.engine.write(user.id, rename("Ada L.")).await.expect("write");
    let WriteOutcome::Applied {
        record: Some(record),
        validator_hint: None,
        invalidation: Invalidation::Completed,
    } = outcome.clone()
    else {
        panic!("unexpected write outcome: {outcome:?}");
    };
    assert_eq!(record.name, "Ada L.");
    assert!(h.engine.store().get(&user.key()).await.is_none());
}
