//! Outbound email seam and the rate notification message.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use ratewatch_core::CurrencyCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("invalid recipient: {0}")]
    Recipient(String),

    #[error("email transport failed: {0}")]
    Transport(String),
}

/// Delivers one email. Delivery is at-least-once from the caller's side, so
/// implementations should tolerate the same message twice.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError>;
}

/// Writes every message to the log instead of dialing SMTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError> {
        if to.trim().is_empty() {
            return Err(SendError::Recipient("empty address".to_string()));
        }
        info!(email = to, subject, body, "email sent");
        Ok(())
    }
}

/// Subject/body of the rate notification for a currency pair.
#[derive(Debug, Clone)]
pub struct RateEmail {
    base: CurrencyCode,
    target: CurrencyCode,
}

impl RateEmail {
    pub fn new(base: CurrencyCode, target: CurrencyCode) -> Self {
        Self { base, target }
    }

    pub fn subject(&self) -> String {
        format!("{} to {} Exchange Rate", self.base, self.target)
    }

    pub fn body(&self, rate: f64) -> String {
        format!(
            "The current exchange rate for {} to {} is {:.2}.",
            self.base, self.target, rate
        )
    }
}
