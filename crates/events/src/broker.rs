//! Message broker contracts (mechanics only).
//!
//! The publisher writes outbox events through a [`MessageWriter`]; the consumer
//! pulls them back through a [`MessageReader`]. Both are transport-agnostic:
//! the in-memory broker backs tests/dev, Redis Streams backs production.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a message is redelivered until it is committed. A reader
//!   that stops before committing leaves the message for the next reader in the
//!   same group.
//! - **Per-partition order**: messages of one `(topic, partition)` are fetched in
//!   write order. Nothing is promised across partitions.
//! - **Manual commits**: readers never auto-commit; the consumer commits only
//!   after the side effect is recorded.

use std::num::ParseIntError;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// A message as delivered by a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    /// Broker-specific position, used to commit this message.
    pub position: String,
    /// ASCII decimal event id.
    pub key: String,
    pub value: Vec<u8>,
}

impl BrokerMessage {
    /// Parse the key back into the outbox event id.
    pub fn event_id(&self) -> Result<u64, ParseIntError> {
        self.key.parse()
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker write failed: {0}")]
    Write(String),

    #[error("broker fetch failed: {0}")]
    Fetch(String),

    #[error("broker commit failed: {0}")]
    Commit(String),

    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Internal lock poisoning (in-memory broker).
    #[error("broker state poisoned")]
    Poisoned,
}

/// Producer side of a broker.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn write_message(
        &self,
        topic: &str,
        partition: i32,
        key: &str,
        value: &[u8],
    ) -> Result<(), BrokerError>;
}

#[async_trait]
impl<W> MessageWriter for Arc<W>
where
    W: MessageWriter + ?Sized,
{
    async fn write_message(
        &self,
        topic: &str,
        partition: i32,
        key: &str,
        value: &[u8],
    ) -> Result<(), BrokerError> {
        (**self).write_message(topic, partition, key, value).await
    }
}

/// Consumer side of a broker, bound to one group and one `(topic, partition)`.
///
/// `fetch_message` waits until a message is available; callers race it against
/// their own cancellation signal.
#[async_trait]
pub trait MessageReader: Send {
    async fn fetch_message(&mut self) -> Result<BrokerMessage, BrokerError>;

    async fn commit_message(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;
}

#[async_trait]
impl<R> MessageReader for Box<R>
where
    R: MessageReader + ?Sized,
{
    async fn fetch_message(&mut self) -> Result<BrokerMessage, BrokerError> {
        (**self).fetch_message().await
    }

    async fn commit_message(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        (**self).commit_message(message).await
    }
}
