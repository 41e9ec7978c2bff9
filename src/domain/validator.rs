//! Entity-tag validators and `If-None-Match` parsing.
//!
//! A [`Validator`] is an opaque token for one observed state of a resource.
//! Conditional reads compare validators with the weak comparison function:
//! two tags match when their opaque parts are equal, regardless of the `W/`
//! prefix on either side.

use std::fmt;

use serde::Serialize;

const WEAK_PREFIX: &str = "W/";

/// An entity tag in its wire form (`"opaque"` or `W/"opaque"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Validator(String);

impl Validator {
    /// Build a strong validator from an opaque value.
    ///
    /// Returns `None` when the value is empty or contains characters that
    /// are not allowed inside an entity tag.
    pub fn strong(opaque: &str) -> Option<Self> {
        valid_opaque(opaque).then(|| Self(format!("\"{opaque}\"")))
    }

    /// Parse a single entity tag as sent by a client.
    ///
    /// Bare tokens without quotes are accepted and treated as strong tags.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (weak, rest) = match raw.strip_prefix(WEAK_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let opaque = match rest.strip_prefix('"') {
            Some(inner) => inner.strip_suffix('"')?,
            None if weak => return None,
            None => rest,
        };

        if !valid_opaque(opaque) {
            return None;
        }

        Some(if weak {
            Self(format!("{WEAK_PREFIX}\"{opaque}\""))
        } else {
            Self(format!("\"{opaque}\""))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_weak(&self) -> bool {
        self.0.starts_with(WEAK_PREFIX)
    }

    /// The opaque part without the weakness marker or quotes.
    pub fn opaque(&self) -> &str {
        let quoted = self.0.strip_prefix(WEAK_PREFIX).unwrap_or(&self.0);
        &quoted[1..quoted.len() - 1]
    }

    pub fn to_weak(&self) -> Self {
        if self.is_weak() {
            self.clone()
        } else {
            Self(format!("{WEAK_PREFIX}{}", self.0))
        }
    }

    /// Weak comparison (RFC 9110 section 8.8.3.2).
    pub fn weak_eq(&self, other: &Validator) -> bool {
        self.opaque() == other.opaque()
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn valid_opaque(opaque: &str) -> bool {
    !opaque.is_empty()
        && opaque
            .bytes()
            .all(|b| b == 0x21 || (0x23..=0x7e).contains(&b))
}

/// Validators a client already holds, taken from `If-None-Match`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConditionalTokens {
    /// `*`: any current representation counts as a match.
    Any,
    /// One or more entity tags.
    Tags(Vec<Validator>),
    /// No usable condition: an unconditional read.
    #[default]
    None,
}

impl ConditionalTokens {
    pub fn none() -> Self {
        Self::None
    }

    pub fn tags(tags: impl IntoIterator<Item = Validator>) -> Self {
        let tags: Vec<Validator> = tags.into_iter().collect();
        if tags.is_empty() {
            Self::None
        } else {
            Self::Tags(tags)
        }
    }

    /// Parse one header value.
    pub fn parse(header: &str) -> Self {
        Self::from_header_values(std::iter::once(header))
    }

    /// Parse every `If-None-Match` field line of a request.
    ///
    /// Malformed members are skipped; a `*` anywhere makes the whole
    /// condition a wildcard.
    pub fn from_header_values<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tags = Vec::new();
        for value in values {
            for member in split_members(value) {
                if member == "*" {
                    return Self::Any;
                }
                if let Some(tag) = Validator::parse(member) {
                    tags.push(tag);
                }
            }
        }
        Self::tags(tags)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// True when `current` satisfies the condition, i.e. the client copy is fresh.
    pub fn matches(&self, current: &Validator) -> bool {
        match self {
            Self::Any => true,
            Self::Tags(tags) => tags.iter().any(|tag| tag.weak_eq(current)),
            Self::None => false,
        }
    }
}

/// Split a list header on commas that are not inside a quoted entity tag.
fn split_members(value: &str) -> impl Iterator<Item = &str> {
    let mut members = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                members.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    members.push(&value[start..]);
    members
        .into_iter()
        .map(str::trim)
        .filter(|member| !member.is_empty())
}
