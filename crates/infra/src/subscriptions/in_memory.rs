use std::sync::RwLock;

use async_trait::async_trait;

use ratewatch_core::{Email, Subscription};

use super::{StoreError, SubscriptionStore};

/// In-memory subscription store.
///
/// Intended for tests/dev. Rows are kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    rows: RwLock<Vec<Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("subscription store lock poisoned".to_string())
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn add_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if rows.iter().any(|row| row.email == subscription.email) {
            return Err(StoreError::Duplicate(subscription.email.to_string()));
        }
        rows.push(subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, email: &Email) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let before = rows.len();
        rows.retain(|row| &row.email != email);
        if rows.len() == before {
            return Err(StoreError::NotFound(email.to_string()));
        }
        Ok(())
    }

    async fn get_subscriptions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn exists(&self, email: &Email) -> Result<bool, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.iter().any(|row| &row.email == email))
    }
}
