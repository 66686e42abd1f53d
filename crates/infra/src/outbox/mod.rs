//! Transactional outbox: the event ledger plus the publisher's offset cursor.
//!
//! The notifier appends [`Event`]s with `add_event`; the publisher drains them
//! through an [`OutboxTransaction`] so that advancing the per-(topic, partition)
//! offset and handing events to the broker commit or roll back together.
//!
//! ## Transactions
//!
//! - Offsets are read and written only through a transaction.
//! - `commit` makes staged offset updates visible; `rollback` discards them.
//! - **Dropping a transaction without committing rolls it back.** This covers
//!   early returns and panics in the publisher.
//! - One publisher per (topic, partition) is assumed. Implementations serialise
//!   concurrent transactions on the offset row but do not detect a second
//!   publisher.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use ratewatch_events::{Event, EventData, Offset};

#[derive(Debug, Error)]
pub enum OutboxError {
    /// The payload could not be serialized; nothing was written.
    #[error("outbox payload serialization failed: {0}")]
    Serialization(String),

    #[error("outbox storage error: {0}")]
    Storage(String),

    #[error("outbox transaction error: {0}")]
    Transaction(String),
}

/// Durable event ledger.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Serialize `data` and append it as a new event. Never overwrites.
    async fn add_event(&self, data: &EventData) -> Result<Event, OutboxError>;

    /// All events with `id > last_offset`, ascending, unbounded.
    async fn fetch_unpublished_events(&self, last_offset: u64) -> Result<Vec<Event>, OutboxError>;

    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, OutboxError>;

    /// Last committed publish offset for `(topic, partition)`, `0` if none.
    async fn committed_offset(&self, topic: &str, partition: i32) -> Result<u64, OutboxError>;

    /// Delete events created before `before` whose id is at or below `up_to_offset`.
    /// Returns the number of events removed.
    async fn prune_published(
        &self,
        before: DateTime<Utc>,
        up_to_offset: u64,
    ) -> Result<u64, OutboxError>;
}

/// Per-(topic, partition) publish cursor.
#[async_trait]
pub trait OffsetStore: Send {
    /// Current offset, `0` when the pair has never been published.
    async fn last_offset(&mut self, topic: &str, partition: i32) -> Result<u64, OutboxError>;

    async fn update_offset(&mut self, offset: &Offset) -> Result<(), OutboxError>;
}

/// An open store transaction used by one publisher cycle.
#[async_trait]
pub trait OutboxTransaction: OffsetStore {
    async fn fetch_unpublished_events(&mut self, last_offset: u64) -> Result<Vec<Event>, OutboxError>;

    async fn commit(self: Box<Self>) -> Result<(), OutboxError>;

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError>;
}
