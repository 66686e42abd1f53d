//! Outbox → broker publisher.
//!
//! Each cycle runs in one outbox transaction:
//!
//! 1. read the offset for (topic, partition), `0` when absent
//! 2. fetch every event above it, ascending
//! 3. nothing to do → roll back, offset untouched
//! 4. per event: write `key = id`, `value = data` to the broker, then stage the
//!    offset at that id
//! 5. commit after the last event
//!
//! The first failed write rolls the whole cycle back. Messages already written
//! for earlier events of that cycle are sent again next tick (at-least-once).
//! A panic drops the transaction, which rolls it back, and is caught by the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use ratewatch_events::{BrokerError, MessageWriter, Offset};

use crate::outbox::{OutboxError, OutboxStore};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error("broker write for event {event_id} failed: {source}")]
    Broker { event_id: u64, source: BrokerError },
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub topic: String,
    pub partition: i32,
    pub interval: Duration,
    /// Published events older than this are pruned after a committed cycle.
    pub retention: Option<Duration>,
}

/// Result of one committed (or empty) cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub published: usize,
    pub offset: u64,
}

pub struct Publisher {
    outbox: Arc<dyn OutboxStore>,
    writer: Arc<dyn MessageWriter>,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        writer: Arc<dyn MessageWriter>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            outbox,
            writer,
            config,
        }
    }

    /// Run one publish cycle.
    #[instrument(
        skip(self),
        fields(topic = %self.config.topic, partition = self.config.partition),
        err
    )]
    pub async fn process_events(&self) -> Result<PublishOutcome, PublishError> {
        let topic = self.config.topic.as_str();
        let partition = self.config.partition;

        let mut tx = self.outbox.begin().await?;
        let last = tx.last_offset(topic, partition).await?;
        let events = tx.fetch_unpublished_events(last).await?;

        if events.is_empty() {
            tx.rollback().await?;
            return Ok(PublishOutcome {
                published: 0,
                offset: last,
            });
        }

        let mut offset = last;
        for event in &events {
            let key = event.id.to_string();
            if let Err(source) = self
                .writer
                .write_message(topic, partition, &key, event.data.as_bytes())
                .await
            {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after broker failure failed");
                }
                return Err(PublishError::Broker {
                    event_id: event.id,
                    source,
                });
            }

            tx.update_offset(&Offset {
                topic: topic.to_string(),
                partition,
                offset: event.id,
            })
            .await?;
            offset = event.id;
        }

        tx.commit().await?;

        debug!(published = events.len(), offset, "publish cycle committed");
        Ok(PublishOutcome {
            published: events.len(),
            offset,
        })
    }

    /// Tick until `cancel` fires. A cycle already running is allowed to finish.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            topic = %self.config.topic,
            partition = self.config.partition,
            interval_ms = self.config.interval.as_millis() as u64,
            "publisher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match AssertUnwindSafe(self.process_events()).catch_unwind().await {
                Ok(Ok(outcome)) if outcome.published > 0 => {
                    info!(published = outcome.published, offset = outcome.offset, "events published");
                    self.prune(outcome.offset).await;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "publish cycle failed, retrying next tick"),
                Err(_) => error!("publish cycle panicked, transaction rolled back"),
            }
        }

        info!("publisher stopped");
    }

    async fn prune(&self, offset: u64) {
        let Some(retention) = self.config.retention else {
            return;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };

        match self.outbox.prune_published(Utc::now() - retention, offset).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "pruned published events"),
            Err(err) => warn!(error = %err, "outbox pruning failed"),
        }
    }
}
