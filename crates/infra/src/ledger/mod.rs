//! Consumer-side idempotency ledger.
//!
//! A row for an event id means the side effect for that event was already
//! performed. The consumer checks the ledger before sending and records the
//! event after sending; the primary key on the id turns a racing second insert
//! into [`LedgerError::AlreadyConsumed`].

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;

use async_trait::async_trait;
use thiserror::Error;

use ratewatch_events::ConsumedEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("event {0} already consumed")]
    AlreadyConsumed(u64),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait ConsumedEventLedger: Send + Sync {
    async fn is_consumed(&self, id: u64) -> Result<bool, LedgerError>;

    async fn add_consumed_event(&self, event: &ConsumedEvent) -> Result<(), LedgerError>;

    async fn find(&self, id: u64) -> Result<Option<ConsumedEvent>, LedgerError>;
}
