//! Validator generation for stored resources.

use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::entities::UserRecord;
use crate::domain::types::ResourceKey;
use crate::domain::validator::Validator;

/// Bytes of the SHA-256 digest kept in hash-based validators.
const HASH_VALIDATOR_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EtagStrategy {
    /// `"{kind}-{id}-v{version}"`: cheap, relies on the repository version bump.
    #[default]
    Version,
    /// Digest over the canonical JSON of the record, version included.
    Hash,
}

impl EtagStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Hash => "hash",
        }
    }
}

impl FromStr for EtagStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "version" => Ok(Self::Version),
            "hash" => Ok(Self::Hash),
            other => Err(format!(
                "unknown etag strategy `{other}` (expected `version` or `hash`)"
            )),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("{key} has invalid version {version}; versions start at 1")]
    InvalidVersion { key: String, version: i64 },
    #[error("record identity {actual} does not match requested {expected}")]
    IdentityMismatch { expected: String, actual: String },
    #[error("failed to serialise {key} for hashing: {message}")]
    Serialization { key: String, message: String },
    #[error("generated token for {key} is not a valid entity tag")]
    MalformedToken { key: String },
}

/// Derives a validator from the observed state of a resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorGenerator {
    strategy: EtagStrategy,
}

impl ValidatorGenerator {
    pub fn new(strategy: EtagStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> EtagStrategy {
        self.strategy
    }

    /// Generate the validator for `record`, which was loaded under `expected`.
    pub fn generate(
        &self,
        expected: &ResourceKey,
        record: &UserRecord,
    ) -> Result<Validator, GenerationError> {
        let key = record.key();
        if key != *expected {
            return Err(GenerationError::IdentityMismatch {
                expected: expected.to_string(),
                actual: key.to_string(),
            });
        }
        if record.version < 1 {
            return Err(GenerationError::InvalidVersion {
                key: key.to_string(),
                version: record.version,
            });
        }

        let opaque = match self.strategy {
            EtagStrategy::Version => format!("{}-{}-v{}", key.kind, key.id, record.version),
            EtagStrategy::Hash => content_digest(&key, record)?,
        };

        Validator::strong(&opaque).ok_or_else(|| GenerationError::MalformedToken {
            key: key.to_string(),
        })
    }
}

/// Hex digest over a canonical serialisation: object keys sorted, no whitespace.
fn content_digest<T: Serialize>(key: &ResourceKey, state: &T) -> Result<String, GenerationError> {
    let canonical = serde_json::to_value(state)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|err| GenerationError::Serialization {
            key: key.to_string(),
            message: err.to_string(),
        })?;

    let digest = Sha256::digest(&canonical);
    Ok(hex::encode(&digest[..HASH_VALIDATOR_BYTES]))
}
