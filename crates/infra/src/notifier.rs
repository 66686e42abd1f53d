//! Notification fan-out: one outbox event per subscriber per run.
//!
//! A run fetches the rate once, then pages through subscriptions. Each page is
//! fanned out as one task per subscriber; the page is awaited as a whole before
//! the next is read. The first enqueue failure in a page is kept (single-slot
//! channel, later failures are only logged) and ends the run after that page
//! settles. Events already appended stay in the outbox and will be published.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn, Span};

use ratewatch_core::CurrencyCode;
use ratewatch_events::EventData;

use crate::outbox::{OutboxError, OutboxStore};
use crate::rate_api::{RateError, RateFetcher};
use crate::subscriptions::{StoreError, SubscriptionStore};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("rate fetch failed: {0}")]
    Rate(#[from] RateError),

    #[error("rate '{0}' is not a valid number")]
    InvalidRate(String),

    #[error("listing subscriptions failed: {0}")]
    Subscriptions(#[from] StoreError),

    #[error("queueing notification for {email} failed: {source}")]
    Enqueue { email: String, source: OutboxError },

    #[error("notification task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotifyReport {
    pub rate: f64,
    pub queued: usize,
    pub batches: usize,
}

pub struct Notifier {
    fetcher: Arc<dyn RateFetcher>,
    subscriptions: Arc<dyn SubscriptionStore>,
    outbox: Arc<dyn OutboxStore>,
    base: CurrencyCode,
    target: CurrencyCode,
    batch_size: usize,
}

impl Notifier {
    pub fn new(
        fetcher: Arc<dyn RateFetcher>,
        subscriptions: Arc<dyn SubscriptionStore>,
        outbox: Arc<dyn OutboxStore>,
        base: CurrencyCode,
        target: CurrencyCode,
    ) -> Self {
        Self {
            fetcher,
            subscriptions,
            outbox,
            base,
            target,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Fetch the current rate, parsed to `f64`.
    pub async fn current_rate(&self) -> Result<f64, NotifyError> {
        let raw = self.fetcher.fetch(&self.base, &self.target).await?;
        match raw.trim().parse::<f64>() {
            Ok(rate) if rate.is_finite() => Ok(rate),
            _ => Err(NotifyError::InvalidRate(raw)),
        }
    }

    #[instrument(skip(self), fields(base = %self.base, target = %self.target, queued), err)]
    pub async fn run(&self) -> Result<NotifyReport, NotifyError> {
        let rate = self.current_rate().await?;

        let mut offset = 0;
        let mut queued = 0;
        let mut batches = 0;

        loop {
            let page = self
                .subscriptions
                .get_subscriptions(self.batch_size, offset)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            batches += 1;

            let (err_tx, mut err_rx) = mpsc::channel::<NotifyError>(1);
            let mut tasks = JoinSet::new();

            for subscription in page {
                let outbox = Arc::clone(&self.outbox);
                let err_tx = err_tx.clone();
                tasks.spawn(async move {
                    let email = subscription.email.into_inner();
                    match outbox.add_event(&EventData::new(email.clone(), rate)).await {
                        Ok(_) => true,
                        Err(source) => {
                            warn!(email = %email, error = %source, "failed to queue notification");
                            // First error wins; the slot may already be taken.
                            let _ = err_tx.try_send(NotifyError::Enqueue { email, source });
                            false
                        }
                    }
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(true) => queued += 1,
                    Ok(false) => {}
                    Err(join_err) => {
                        warn!(error = %join_err, "notification task aborted");
                        let _ = err_tx.try_send(NotifyError::Task(join_err.to_string()));
                    }
                }
            }
            drop(err_tx);

            if let Ok(err) = err_rx.try_recv() {
                Span::current().record("queued", queued);
                return Err(err);
            }
        }

        Span::current().record("queued", queued);
        info!(rate, queued, batches, "notifications queued");
        Ok(NotifyReport {
            rate,
            queued,
            batches,
        })
    }
}
