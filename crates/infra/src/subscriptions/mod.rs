//! Subscriber records: durable CRUD plus a paginated scan.
//!
//! Uniqueness on email is enforced by the store itself and surfaces as
//! [`StoreError::Duplicate`]. Callers may pre-check with `exists`, but only the
//! insert is authoritative.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemorySubscriptionStore;
pub use postgres::PostgresSubscriptionStore;

use async_trait::async_trait;
use thiserror::Error;

use ratewatch_core::{Email, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A subscription with this email already exists.
    #[error("subscription already exists: {0}")]
    Duplicate(String),

    #[error("subscription not found: {0}")]
    NotFound(String),

    /// Storage backend failure (connection, query, decoding).
    #[error("subscription storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn add_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Remove the row for `email`; `NotFound` when nothing matched.
    async fn delete_subscription(&self, email: &Email) -> Result<(), StoreError>;

    /// One page of subscriptions in creation order.
    async fn get_subscriptions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Subscription>, StoreError>;

    async fn exists(&self, email: &Email) -> Result<bool, StoreError>;
}
