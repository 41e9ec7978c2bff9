//! User write models and their validation rules.

use serde::Deserialize;

use super::error::DomainError;

const MAX_NAME_CHARS: usize = 200;

/// Input for creating a user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

impl NewUser {
    /// Validate and normalise the draft, returning the trimmed values.
    pub fn validate(self) -> Result<Self, DomainError> {
        Ok(Self {
            name: validate_name(&self.name)?,
            email: validate_email(&self.email)?,
        })
    }
}

/// Partial update for a user; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserPatch {
    pub fn validate(self) -> Result<Self, DomainError> {
        let name = self.name.as_deref().map(validate_name).transpose()?;
        let email = self.email.as_deref().map(validate_email).transpose()?;
        Ok(Self { name, email })
    }
}

fn validate_name(raw: &str) -> Result<String, DomainError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(DomainError::validation(
            "name",
            format!("must be at most {MAX_NAME_CHARS} characters"),
        ));
    }
    Ok(name.to_string())
}

fn validate_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::validation("email", "missing `@`"));
    };

    if local.is_empty() || local.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("email", "invalid local part"));
    }

    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.chars().any(char::is_whitespace);
    if !domain_ok {
        return Err(DomainError::validation("email", "invalid domain"));
    }

    Ok(email.to_ascii_lowercase())
}
