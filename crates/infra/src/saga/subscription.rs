//! Subscription saga: validate → persist, with compensation.
//!
//! The step list is data (`Vec<SubscriptionStep>`) walked by a single executor:
//!
//! - forward: run the current step's action; on success advance
//! - on the first failure: switch to compensating; the failed step is not
//!   compensated (its write did not happen), unwinding starts below it
//! - compensating: run the step's compensation if it has one, then step back;
//!   passing below step 0 marks the run `failed`
//! - every transition is persisted before the next step runs
//!
//! With the default `[Validate, Persist]` list nothing sits after `Persist`, so
//! its compensation (`delete_subscription`) only runs once a later step exists.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, instrument, warn, Span};

use ratewatch_core::{DomainError, Email, Subscription};
use ratewatch_events::{SagaState, SagaStatus};

use crate::subscriptions::{StoreError, SubscriptionStore};

use super::{SagaStateStore, SagaStoreError};

/// Caller-facing outcome of a failed subscription.
///
/// Store and saga-persistence errors are never surfaced raw: they collapse
/// into `Internal` and are logged here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("email is already subscribed")]
    Duplicate,

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("internal error")]
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStep {
    /// Check the address format and that no subscription exists yet.
    Validate,
    /// Insert the subscription row; compensated by deleting it.
    Persist,
}

impl SubscriptionStep {
    pub fn name(self) -> &'static str {
        match self {
            SubscriptionStep::Validate => "validate_subscription",
            SubscriptionStep::Persist => "add_subscription",
        }
    }

    /// Pure checks need no undo.
    pub fn has_compensation(self) -> bool {
        matches!(self, SubscriptionStep::Persist)
    }
}

/// Why a step (or its compensation) failed.
#[derive(Debug, Error)]
enum StepError {
    #[error("duplicate subscription")]
    Duplicate,

    #[error(transparent)]
    InvalidEmail(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => StepError::Duplicate,
            other => StepError::Store(other),
        }
    }
}

impl From<StepError> for SubscribeError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Duplicate => SubscribeError::Duplicate,
            StepError::InvalidEmail(e) => SubscribeError::InvalidEmail(e.to_string()),
            StepError::Store(_) => SubscribeError::Internal,
        }
    }
}

pub struct SubscriptionSaga {
    subscriptions: Arc<dyn SubscriptionStore>,
    states: Arc<dyn SagaStateStore>,
    steps: Vec<SubscriptionStep>,
}

impl SubscriptionSaga {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, states: Arc<dyn SagaStateStore>) -> Self {
        Self::with_steps(
            subscriptions,
            states,
            vec![SubscriptionStep::Validate, SubscriptionStep::Persist],
        )
    }

    pub fn with_steps(
        subscriptions: Arc<dyn SubscriptionStore>,
        states: Arc<dyn SagaStateStore>,
        steps: Vec<SubscriptionStep>,
    ) -> Self {
        Self {
            subscriptions,
            states,
            steps,
        }
    }

    /// Create a subscription for `email`.
    ///
    /// `Ok` only when the run ends `completed`.
    pub async fn add_subscription(&self, email: &str) -> Result<(), SubscribeError> {
        self.run(SagaState::start(email.trim())).await.map(|_| ())
    }

    /// Drive `state` to a terminal status, returning the final state on success.
    #[instrument(skip(self, state), fields(saga_id = %state.id, email = %state.email, status), err)]
    pub async fn run(&self, mut state: SagaState) -> Result<SagaState, SubscribeError> {
        self.persist(&state).await?;

        let mut failure: Option<StepError> = None;

        while state.current_step < self.steps.len() {
            let step = self.steps[state.current_step];

            if !state.is_compensating {
                match self.execute(step, &state.email).await {
                    Ok(()) => state.advance(),
                    Err(err) => {
                        warn!(step = step.name(), error = %err, "saga step failed, compensating");
                        failure = Some(err);
                        if !state.begin_compensation() {
                            return self.finish_failed(state, failure).await;
                        }
                    }
                }
            } else {
                if step.has_compensation() {
                    if let Err(err) = self.compensate(step, &state.email).await {
                        error!(step = step.name(), error = %err, "saga compensation failed");
                        state.fail();
                        self.persist(&state).await?;
                        return Err(SubscribeError::Internal);
                    }
                }
                if !state.step_back() {
                    return self.finish_failed(state, failure).await;
                }
            }

            self.persist(&state).await?;
        }

        state.complete();
        self.persist(&state).await?;
        Span::current().record("status", SagaStatus::Completed.as_str());
        info!("saga completed");
        Ok(state)
    }

    async fn execute(&self, step: SubscriptionStep, raw_email: &str) -> Result<(), StepError> {
        match step {
            SubscriptionStep::Validate => {
                let email = Email::parse(raw_email)?;
                if self.subscriptions.exists(&email).await? {
                    return Err(StepError::Duplicate);
                }
                Ok(())
            }
            SubscriptionStep::Persist => {
                let email = Email::parse(raw_email)?;
                let subscription = Subscription::new(email, Utc::now());
                self.subscriptions.add_subscription(&subscription).await?;
                Ok(())
            }
        }
    }

    async fn compensate(&self, step: SubscriptionStep, raw_email: &str) -> Result<(), StepError> {
        match step {
            SubscriptionStep::Validate => Ok(()),
            SubscriptionStep::Persist => {
                let email = Email::parse(raw_email)?;
                match self.subscriptions.delete_subscription(&email).await {
                    // Already gone is what compensation wants.
                    Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
                    Err(err) => Err(StepError::Store(err)),
                }
            }
        }
    }

    async fn finish_failed(
        &self,
        mut state: SagaState,
        failure: Option<StepError>,
    ) -> Result<SagaState, SubscribeError> {
        state.fail();
        self.persist(&state).await?;
        Span::current().record("status", SagaStatus::Failed.as_str());
        Err(failure.map(SubscribeError::from).unwrap_or(SubscribeError::Internal))
    }

    async fn persist(&self, state: &SagaState) -> Result<(), SubscribeError> {
        self.states.save(state).await.map_err(|err: SagaStoreError| {
            error!(saga_id = %state.id, error = %err, "failed to persist saga state");
            SubscribeError::Internal
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::saga::InMemorySagaStateStore;
    use crate::subscriptions::InMemorySubscriptionStore;

    fn setup() -> (
        Arc<InMemorySubscriptionStore>,
        Arc<InMemorySagaStateStore>,
        SubscriptionSaga,
    ) {
        let subs = Arc::new(InMemorySubscriptionStore::new());
        let states = Arc::new(InMemorySagaStateStore::new());
        let saga = SubscriptionSaga::new(subs.clone(), states.clone());
        (subs, states, saga)
    }

    #[tokio::test]
    async fn new_email_is_persisted_and_run_completes() {
        let (subs, states, saga) = setup();

        saga.add_subscription("new@example.com").await.unwrap();

        assert_eq!(subs.len(), 1);
        let runs = states.all();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, SagaStatus::Completed);
        assert_eq!(runs[0].current_step, 2);
        assert!(!runs[0].is_compensating);
    }

    #[tokio::test]
    async fn existing_email_is_a_duplicate_and_adds_nothing() {
        let (subs, states, saga) = setup();
        subs.add_subscription(&Subscription::new(
            Email::parse("dup@example.com").unwrap(),
            Utc::now(),
        ))
        .await
        .unwrap();

        let err = saga.add_subscription("dup@example.com").await.unwrap_err();

        assert_eq!(err, SubscribeError::Duplicate);
        assert_eq!(subs.len(), 1);
        let runs = states.all();
        assert_eq!(runs[0].status, SagaStatus::Failed);
        assert!(runs[0].is_compensating);
    }

    #[tokio::test]
    async fn malformed_email_is_rejected_before_any_write() {
        let (subs, _states, saga) = setup();

        let err = saga.add_subscription("not-an-email").await.unwrap_err();

        assert!(matches!(err, SubscribeError::InvalidEmail(_)));
        assert!(subs.is_empty());
    }

    /// Pre-check passes but a concurrent writer wins the insert.
    struct RacingStore {
        inner: InMemorySubscriptionStore,
    }

    #[async_trait]
    impl SubscriptionStore for RacingStore {
        async fn add_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
            self.inner.add_subscription(subscription).await?;
            Err(StoreError::Duplicate(subscription.email.to_string()))
        }

        async fn delete_subscription(&self, email: &Email) -> Result<(), StoreError> {
            self.inner.delete_subscription(email).await
        }

        async fn get_subscriptions(
            &self,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<Subscription>, StoreError> {
            self.inner.get_subscriptions(limit, offset).await
        }

        async fn exists(&self, _email: &Email) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn insert_race_maps_to_duplicate_and_keeps_the_winner() {
        let subs = Arc::new(RacingStore {
            inner: InMemorySubscriptionStore::new(),
        });
        let saga = SubscriptionSaga::new(subs.clone(), Arc::new(InMemorySagaStateStore::new()));

        let err = saga.add_subscription("race@example.com").await.unwrap_err();

        assert_eq!(err, SubscribeError::Duplicate);
        // The failing step is not compensated: the other writer's row stays.
        assert_eq!(subs.inner.len(), 1);
    }

    #[tokio::test]
    async fn later_failure_unwinds_earlier_persist() {
        let subs = Arc::new(InMemorySubscriptionStore::new());
        let states = Arc::new(InMemorySagaStateStore::new());
        // The second persist collides with the first and triggers compensation.
        let saga = SubscriptionSaga::with_steps(
            subs.clone(),
            states.clone(),
            vec![
                SubscriptionStep::Validate,
                SubscriptionStep::Persist,
                SubscriptionStep::Persist,
            ],
        );

        let err = saga.add_subscription("undo@example.com").await.unwrap_err();

        assert_eq!(err, SubscribeError::Duplicate);
        assert!(subs.is_empty());
        let runs = states.all();
        let run = &runs[0];
        assert_eq!(run.status, SagaStatus::Failed);
        assert_eq!(run.current_step, 0);
    }

    struct StuckStore {
        inner: InMemorySubscriptionStore,
    }

    #[async_trait]
    impl SubscriptionStore for StuckStore {
        async fn add_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
            self.inner.add_subscription(subscription).await
        }

        async fn delete_subscription(&self, _email: &Email) -> Result<(), StoreError> {
            Err(StoreError::Storage("connection reset".to_string()))
        }

        async fn get_subscriptions(
            &self,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<Subscription>, StoreError> {
            self.inner.get_subscriptions(limit, offset).await
        }

        async fn exists(&self, email: &Email) -> Result<bool, StoreError> {
            self.inner.exists(email).await
        }
    }

    #[tokio::test]
    async fn failed_compensation_marks_run_failed_with_internal_error() {
        let subs = Arc::new(StuckStore {
            inner: InMemorySubscriptionStore::new(),
        });
        let states = Arc::new(InMemorySagaStateStore::new());
        let saga = SubscriptionSaga::with_steps(
            subs.clone(),
            states.clone(),
            vec![
                SubscriptionStep::Validate,
                SubscriptionStep::Persist,
                SubscriptionStep::Persist,
            ],
        );

        let err = saga.add_subscription("stuck@example.com").await.unwrap_err();

        assert_eq!(err, SubscribeError::Internal);
        let runs = states.all();
        let run = &runs[0];
        assert_eq!(run.status, SagaStatus::Failed);
        assert!(run.is_compensating);
        assert_eq!(run.current_step, 1);
    }

    /// Shared, ordered log of saga saves and subscription deletes.
    type Journal = Arc<std::sync::Mutex<Vec<String>>>;

    struct JournaledStates {
        journal: Journal,
    }

    #[async_trait]
    impl SagaStateStore for JournaledStates {
        async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
            self.journal.lock().unwrap().push(format!(
                "save step={} compensating={} {}",
                state.current_step,
                state.is_compensating,
                state.status.as_str()
            ));
            Ok(())
        }

        async fn load(&self, _id: ratewatch_core::SagaId) -> Result<Option<SagaState>, SagaStoreError> {
            Ok(None)
        }
    }

    struct JournaledSubscriptions {
        inner: InMemorySubscriptionStore,
        journal: Journal,
    }

    #[async_trait]
    impl SubscriptionStore for JournaledSubscriptions {
        async fn add_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
            self.inner.add_subscription(subscription).await
        }

        async fn delete_subscription(&self, email: &Email) -> Result<(), StoreError> {
            self.journal.lock().unwrap().push("delete".to_string());
            self.inner.delete_subscription(email).await
        }

        async fn get_subscriptions(
            &self,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<Subscription>, StoreError> {
            self.inner.get_subscriptions(limit, offset).await
        }

        async fn exists(&self, email: &Email) -> Result<bool, StoreError> {
            self.inner.exists(email).await
        }
    }

    fn journaled(steps: Vec<SubscriptionStep>) -> (Journal, SubscriptionSaga) {
        let journal = Journal::default();
        let subs = Arc::new(JournaledSubscriptions {
            inner: InMemorySubscriptionStore::new(),
            journal: journal.clone(),
        });
        let states = Arc::new(JournaledStates {
            journal: journal.clone(),
        });
        (journal, SubscriptionSaga::with_steps(subs, states, steps))
    }

    #[tokio::test]
    async fn every_forward_transition_is_saved_before_the_next_step() {
        let (journal, saga) =
            journaled(vec![SubscriptionStep::Validate, SubscriptionStep::Persist]);

        saga.add_subscription("steps@example.com").await.unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            [
                "save step=0 compensating=false in_progress",
                "save step=1 compensating=false in_progress",
                "save step=2 compensating=false in_progress",
                "save step=2 compensating=false completed",
            ]
        );
    }

    #[tokio::test]
    async fn compensating_state_is_saved_before_the_undo_runs() {
        let (journal, saga) = journaled(vec![
            SubscriptionStep::Validate,
            SubscriptionStep::Persist,
            SubscriptionStep::Persist,
        ]);

        let err = saga.add_subscription("unwind@example.com").await.unwrap_err();

        assert_eq!(err, SubscribeError::Duplicate);
        assert_eq!(
            *journal.lock().unwrap(),
            [
                "save step=0 compensating=false in_progress",
                "save step=1 compensating=false in_progress",
                "save step=2 compensating=false in_progress",
                "save step=1 compensating=true in_progress",
                "delete",
                "save step=0 compensating=true in_progress",
                "save step=0 compensating=true failed",
            ]
        );
    }
}
