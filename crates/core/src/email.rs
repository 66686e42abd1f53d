//! Subscriber email address.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

const MAX_LEN: usize = 254;

/// A syntactically valid, normalised (trimmed, lower-cased) email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl ValueObject for Email {}

impl Email {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let email = raw.trim().to_lowercase();

        if email.is_empty() {
            return Err(DomainError::invalid_email("email is required"));
        }
        if email.len() > MAX_LEN {
            return Err(DomainError::invalid_email(format!("longer than {MAX_LEN} characters")));
        }
        if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::invalid_email("contains whitespace"));
        }

        let (local, domain) = email
            .split_once('@')
            .ok_or_else(|| DomainError::invalid_email("missing '@'"))?;

        if local.is_empty() {
            return Err(DomainError::invalid_email("empty local part"));
        }
        if domain.contains('@') {
            return Err(DomainError::invalid_email("more than one '@'"));
        }
        if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            return Err(DomainError::invalid_email(format!("bad domain '{domain}'")));
        }

        Ok(Self(email))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for Email {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Email {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}
