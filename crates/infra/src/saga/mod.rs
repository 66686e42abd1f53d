//! Saga infrastructure: state persistence and the subscription orchestrator.

pub mod postgres;
pub mod subscription;

pub use postgres::PostgresSagaStateStore;
pub use subscription::{SubscribeError, SubscriptionSaga, SubscriptionStep};

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use ratewatch_core::SagaId;
use ratewatch_events::SagaState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SagaStoreError {
    /// The stored run already reached `completed`/`failed` and cannot change.
    #[error("saga {0} is terminal")]
    Terminal(SagaId),

    #[error("saga state storage error: {0}")]
    Storage(String),
}

/// Repository for persisted saga progress, one row per run.
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    /// Insert or update the row for `state.id`.
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError>;

    async fn load(&self, id: SagaId) -> Result<Option<SagaState>, SagaStoreError>;
}

/// In-memory saga state store. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySagaStateStore {
    states: RwLock<HashMap<SagaId, SagaState>>,
}

impl InMemorySagaStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every persisted run, in no particular order.
    pub fn all(&self) -> Vec<SagaState> {
        self.states
            .read()
            .map(|states| states.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SagaStateStore for InMemorySagaStateStore {
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| SagaStoreError::Storage("saga store lock poisoned".to_string()))?;

        if let Some(existing) = states.get(&state.id) {
            if existing.status.is_terminal() {
                return Err(SagaStoreError::Terminal(state.id));
            }
        }
        states.insert(state.id, state.clone());
        Ok(())
    }

    async fn load(&self, id: SagaId) -> Result<Option<SagaState>, SagaStoreError> {
        let states = self
            .states
            .read()
            .map_err(|_| SagaStoreError::Storage("saga store lock poisoned".to_string()))?;
        Ok(states.get(&id).cloned())
    }
}
