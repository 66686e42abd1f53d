use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use ratewatch_events::ConsumedEvent;

use super::{ConsumedEventLedger, LedgerError};

/// In-memory ledger keyed by event id. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    rows: RwLock<BTreeMap<u64, ConsumedEvent>>,
}

impl InMemoryLedger {
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

fn poisoned() -> LedgerError {
    LedgerError::Storage("ledger lock poisoned".to_string())
}

#[async_trait]
impl ConsumedEventLedger for InMemoryLedger {
    async fn is_consumed(&self, id: u64) -> Result<bool, LedgerError> {
        Ok(self.rows.read().map_err(|_| poisoned())?.contains_key(&id))
    }

    async fn add_consumed_event(&self, event: &ConsumedEvent) -> Result<(), LedgerError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if rows.contains_key(&event.id) {
            return Err(LedgerError::AlreadyConsumed(event.id));
        }
        rows.insert(event.id, event.clone());
        Ok(())
    }

    async fn find(&self, id: u64) -> Result<Option<ConsumedEvent>, LedgerError> {
        Ok(self.rows.read().map_err(|_| poisoned())?.get(&id).cloned())
    }
}
