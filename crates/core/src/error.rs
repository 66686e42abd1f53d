//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (malformed
/// emails, currency codes, identifiers). Storage and transport failures belong
/// to the adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An email address was rejected.
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    /// A currency code was not three ASCII letters.
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_email(msg: impl Into<String>) -> Self {
        Self::InvalidEmail(msg.into())
    }

    pub fn invalid_currency(msg: impl Into<String>) -> Self {
        Self::InvalidCurrency(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
