//! Broker → email consumer.
//!
//! Pulls one message at a time and commits it only once the send is recorded
//! in the ledger. No single failure stops the loop; the message is simply left
//! uncommitted (redelivered to the next reader session) or, for a failed
//! commit, redelivered and then recognised as a duplicate.
//!
//! Per message:
//!
//! 1. decode the payload and the key (event id); undecodable → log, skip
//! 2. already in the ledger → count a duplicate, commit, done
//! 3. send the email; failure → log, leave uncommitted
//! 4. record the ledger row; a racing insert counts as a duplicate
//! 5. commit the broker position; failure → log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ratewatch_events::{BrokerMessage, ConsumedEvent, EventData, MessageReader};

use crate::ledger::{ConsumedEventLedger, LedgerError};
use crate::sender::{RateEmail, Sender};

/// Pause after a failed fetch before asking the broker again.
const FETCH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    sent: AtomicU64,
    duplicates: AtomicU64,
    send_failures: AtomicU64,
    decode_failures: AtomicU64,
    ledger_failures: AtomicU64,
    committed: AtomicU64,
    commit_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub duplicates: u64,
    pub send_failures: u64,
    pub decode_failures: u64,
    pub ledger_failures: u64,
    pub committed: u64,
    pub commit_failures: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            ledger_failures: self.ledger_failures.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Consumer {
    reader: Box<dyn MessageReader>,
    ledger: Arc<dyn ConsumedEventLedger>,
    sender: Arc<dyn Sender>,
    email: RateEmail,
    stats: Arc<ConsumerStats>,
}

impl Consumer {
    pub fn new(
        reader: Box<dyn MessageReader>,
        ledger: Arc<dyn ConsumedEventLedger>,
        sender: Arc<dyn Sender>,
        email: RateEmail,
    ) -> Self {
        Self {
            reader,
            ledger,
            sender,
            email,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Pull and process messages until `cancel` fires. A message already
    /// fetched is processed to the end before the loop checks again.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("consumer started");

        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                fetched = self.reader.fetch_message() => fetched,
            };

            match fetched {
                Ok(message) => self.process(message).await,
                Err(err) => {
                    warn!(error = %err, "broker fetch failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_BACKOFF) => {}
                    }
                }
            }
        }

        info!(stats = ?self.stats.snapshot(), "consumer stopped");
    }

    /// Handle one message. Never fails; every outcome is logged and counted.
    pub async fn process(&mut self, message: BrokerMessage) {
        ConsumerStats::bump(&self.stats.received);

        let data = match EventData::from_slice(&message.value) {
            Ok(data) => data,
            Err(err) => {
                ConsumerStats::bump(&self.stats.decode_failures);
                warn!(key = %message.key, position = %message.position, error = %err, "undecodable payload, skipping");
                return;
            }
        };
        let event_id = match message.event_id() {
            Ok(id) => id,
            Err(err) => {
                ConsumerStats::bump(&self.stats.decode_failures);
                warn!(key = %message.key, position = %message.position, error = %err, "message key is not an event id, skipping");
                return;
            }
        };

        match self.ledger.is_consumed(event_id).await {
            Ok(true) => {
                ConsumerStats::bump(&self.stats.duplicates);
                info!(event_id, email = %data.email, "event already consumed, not sending again");
                self.commit(&message, event_id).await;
                return;
            }
            Ok(false) => {}
            Err(err) => {
                ConsumerStats::bump(&self.stats.ledger_failures);
                warn!(event_id, error = %err, "ledger lookup failed, leaving message uncommitted");
                return;
            }
        }

        let subject = self.email.subject();
        let body = self.email.body(data.rate);
        if let Err(err) = self.sender.send(&data.email, &subject, &body).await {
            ConsumerStats::bump(&self.stats.send_failures);
            warn!(event_id, email = %data.email, error = %err, "send failed, leaving message uncommitted");
            return;
        }
        ConsumerStats::bump(&self.stats.sent);

        let record = ConsumedEvent {
            id: event_id,
            data: String::from_utf8_lossy(&message.value).into_owned(),
            consumed_at: Utc::now(),
        };
        match self.ledger.add_consumed_event(&record).await {
            Ok(()) => {}
            Err(LedgerError::AlreadyConsumed(_)) => {
                ConsumerStats::bump(&self.stats.duplicates);
                warn!(event_id, email = %data.email, "event recorded concurrently, probable duplicate send");
            }
            Err(err) => {
                ConsumerStats::bump(&self.stats.ledger_failures);
                warn!(event_id, error = %err, "recording consumed event failed, leaving message uncommitted");
                return;
            }
        }

        self.commit(&message, event_id).await;
    }

    async fn commit(&mut self, message: &BrokerMessage, event_id: u64) {
        match self.reader.commit_message(message).await {
            Ok(()) => {
                ConsumerStats::bump(&self.stats.committed);
                debug!(event_id, position = %message.position, "message committed");
            }
            Err(err) => {
                ConsumerStats::bump(&self.stats.commit_failures);
                warn!(event_id, position = %message.position, error = %err, "commit failed, message will be redelivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ratewatch_core::CurrencyCode;
    use ratewatch_events::{InMemoryBroker, MessageWriter};

    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::sender::testing::RecordingSender;

    const TOPIC: &str = "rate-notifications";
    const GROUP: &str = "email-senders";

    fn rate_email() -> RateEmail {
        RateEmail::new(CurrencyCode::parse("USD").unwrap(), CurrencyCode::parse("UAH").unwrap())
    }

    fn consumer(
        broker: &Arc<InMemoryBroker>,
        ledger: Arc<InMemoryLedger>,
        sender: Arc<RecordingSender>,
    ) -> Consumer {
        let reader = broker.reader(GROUP, TOPIC, 0).unwrap();
        Consumer::new(Box::new(reader), ledger, sender, rate_email())
    }

    async fn publish(broker: &InMemoryBroker, id: u64, email: &str) {
        let value = EventData::new(email, 41.0).to_json().unwrap();
        broker
            .write_message(TOPIC, 0, &id.to_string(), value.as_bytes())
            .await
            .unwrap();
    }

    async fn drain(consumer: &mut Consumer, n: usize) {
        for _ in 0..n {
            let msg = consumer.reader.fetch_message().await.unwrap();
            consumer.process(msg).await;
        }
    }

    #[tokio::test]
    async fn sends_records_and_commits() {
        let broker = InMemoryBroker::new();
        let ledger = Arc::new(InMemoryLedger::new());
        let sender = Arc::new(RecordingSender::default());
        publish(&broker, 7, "a@example.com").await;

        let mut c = consumer(&broker, ledger.clone(), sender.clone());
        drain(&mut c, 1).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@example.com");
        assert_eq!(sent[0].subject, "USD to UAH Exchange Rate");
        assert_eq!(sent[0].body, "The current exchange rate for USD to UAH is 41.00.");

        let row = ledger.find(7).await.unwrap().unwrap();
        assert_eq!(EventData::from_json(&row.data).unwrap().email, "a@example.com");
        assert_eq!(broker.committed_index(GROUP, TOPIC, 0).unwrap(), 1);
    }

    #[tokio::test]
    async fn replayed_message_is_detected_and_not_resent() {
        let broker = InMemoryBroker::new();
        let ledger = Arc::new(InMemoryLedger::new());
        let sender = Arc::new(RecordingSender::default());
        publish(&broker, 1, "a@example.com").await;
        publish(&broker, 1, "a@example.com").await;

        let mut c = consumer(&broker, ledger.clone(), sender.clone());
        drain(&mut c, 2).await;

        let stats = c.stats().snapshot();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.committed, 2);
        assert_eq!(sender.sent().len(), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn poison_message_is_skipped_without_commit() {
        let broker = InMemoryBroker::new();
        let ledger = Arc::new(InMemoryLedger::new());
        let sender = Arc::new(RecordingSender::default());
        broker.write_message(TOPIC, 0, "1", b"not json").await.unwrap();
        publish(&broker, 2, "b@example.com").await;

        let mut c = consumer(&broker, ledger.clone(), sender.clone());
        drain(&mut c, 2).await;

        assert_eq!(c.stats().snapshot().decode_failures, 1);
        assert_eq!(sender.sent().len(), 1);
        assert!(ledger.find(1).await.unwrap().is_none());
        assert!(ledger.find(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_send_is_redelivered_to_next_session() {
        let broker = InMemoryBroker::new();
        let ledger = Arc::new(InMemoryLedger::new());
        publish(&broker, 1, "flaky@example.com").await;

        let failing = Arc::new(RecordingSender::failing_for("flaky@example.com"));
        let mut first = consumer(&broker, ledger.clone(), failing.clone());
        drain(&mut first, 1).await;
        assert_eq!(first.stats().snapshot().send_failures, 1);
        assert!(ledger.is_empty());
        assert_eq!(broker.committed_index(GROUP, TOPIC, 0).unwrap(), 0);
        drop(first);

        let healthy = Arc::new(RecordingSender::default());
        let mut second = consumer(&broker, ledger.clone(), healthy.clone());
        drain(&mut second, 1).await;
        assert_eq!(healthy.sent().len(), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn failed_send_survives_a_later_commit() {
        let broker = InMemoryBroker::new();
        let ledger = Arc::new(InMemoryLedger::new());
        publish(&broker, 1, "flaky@example.com").await;
        publish(&broker, 2, "ok@example.com").await;

        let failing = Arc::new(RecordingSender::failing_for("flaky@example.com"));
        let mut first = consumer(&broker, ledger.clone(), failing.clone());
        drain(&mut first, 2).await;
        let stats = first.stats().snapshot();
        assert_eq!((stats.send_failures, stats.committed), (1, 1));
        assert_eq!(broker.committed_index(GROUP, TOPIC, 0).unwrap(), 0);
        drop(first);

        let healthy = Arc::new(RecordingSender::default());
        let mut second = consumer(&broker, ledger.clone(), healthy.clone());
        let msg = tokio::time::timeout(Duration::from_secs(2), second.reader.fetch_message())
            .await
            .expect("skipped message was not redelivered")
            .unwrap();
        assert_eq!(msg.key, "1");
        second.process(msg).await;

        let sent = healthy.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "flaky@example.com");
        assert!(ledger.find(1).await.unwrap().is_some());
        assert_eq!(broker.committed_index(GROUP, TOPIC, 0).unwrap(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let broker = InMemoryBroker::new();
        let c = consumer(
            &broker,
            Arc::new(InMemoryLedger::new()),
            Arc::new(RecordingSender::default()),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(c.run(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }
}
