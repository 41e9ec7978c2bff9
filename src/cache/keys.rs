//! Cache key layout: `{prefix}:{kind}:{id}`, e.g. `etag:user:42`.

use std::fmt;

use crate::domain::types::ResourceKey;

/// Fully namespaced backend key for one resource's validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatorKey(String);

impl ValidatorKey {
    pub fn new(prefix: &str, resource: &ResourceKey) -> Self {
        Self(format!("{prefix}:{}:{}", resource.kind, resource.id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix shared by every key in a namespace, including the trailing colon.
pub(crate) fn namespace(prefix: &str) -> String {
    format!("{prefix}:")
}
