use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use ratewatch_events::{Event, EventData, Offset};

use super::{OffsetStore, OutboxError, OutboxStore, OutboxTransaction};

type OffsetKey = (String, i32);

#[derive(Debug, Default)]
struct OutboxState {
    events: Vec<Event>,
    last_id: u64,
    offsets: HashMap<OffsetKey, u64>,
}

/// In-memory outbox.
///
/// Intended for tests/dev. Transactions are serialised by an async lock, mirroring
/// the row lock the Postgres store takes on the offset.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<OutboxState>>,
    tx_lock: Arc<tokio::sync::Mutex<()>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event still in the outbox, ascending.
    pub fn events(&self) -> Result<Vec<Event>, OutboxError> {
        Ok(lock(&self.state)?.events.clone())
    }
}

fn lock(state: &Mutex<OutboxState>) -> Result<MutexGuard<'_, OutboxState>, OutboxError> {
    state
        .lock()
        .map_err(|_| OutboxError::Storage("outbox lock poisoned".to_string()))
}

fn unpublished(state: &OutboxState, last_offset: u64) -> Vec<Event> {
    state
        .events
        .iter()
        .filter(|e| e.id > last_offset)
        .cloned()
        .collect()
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn add_event(&self, data: &EventData) -> Result<Event, OutboxError> {
        let payload = data
            .to_json()
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;

        let mut state = lock(&self.state)?;
        state.last_id += 1;
        let event = Event {
            id: state.last_id,
            data: payload,
            created_at: Utc::now(),
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn fetch_unpublished_events(&self, last_offset: u64) -> Result<Vec<Event>, OutboxError> {
        Ok(unpublished(&*lock(&self.state)?, last_offset))
    }

    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, OutboxError> {
        let guard = Arc::clone(&self.tx_lock).lock_owned().await;
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            staged: HashMap::new(),
            _guard: guard,
        }))
    }

    async fn committed_offset(&self, topic: &str, partition: i32) -> Result<u64, OutboxError> {
        let state = lock(&self.state)?;
        Ok(state
            .offsets
            .get(&(topic.to_string(), partition))
            .copied()
            .unwrap_or(0))
    }

    async fn prune_published(
        &self,
        before: DateTime<Utc>,
        up_to_offset: u64,
    ) -> Result<u64, OutboxError> {
        let mut state = lock(&self.state)?;
        let len = state.events.len();
        state
            .events
            .retain(|e| !(e.created_at < before && e.id <= up_to_offset));
        Ok((len - state.events.len()) as u64)
    }
}

/// Staged offset updates; applied on commit, discarded on rollback or drop.
struct InMemoryTransaction {
    state: Arc<Mutex<OutboxState>>,
    staged: HashMap<OffsetKey, u64>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl OffsetStore for InMemoryTransaction {
    async fn last_offset(&mut self, topic: &str, partition: i32) -> Result<u64, OutboxError> {
        let key = (topic.to_string(), partition);
        if let Some(staged) = self.staged.get(&key) {
            return Ok(*staged);
        }
        Ok(lock(&self.state)?.offsets.get(&key).copied().unwrap_or(0))
    }

    async fn update_offset(&mut self, offset: &Offset) -> Result<(), OutboxError> {
        let current = self.last_offset(&offset.topic, offset.partition).await?;
        self.staged.insert(
            (offset.topic.clone(), offset.partition),
            current.max(offset.offset),
        );
        Ok(())
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn fetch_unpublished_events(&mut self, last_offset: u64) -> Result<Vec<Event>, OutboxError> {
        Ok(unpublished(&*lock(&self.state)?, last_offset))
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        let mut state = lock(&self.state)?;
        for (key, value) in &self.staged {
            let committed = state.offsets.entry(key.clone()).or_insert(0);
            *committed = (*committed).max(*value);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        Ok(())
    }
}
