//! In-memory broker for tests/dev.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::broker::{BrokerError, BrokerMessage, MessageReader, MessageWriter};

type PartitionKey = (String, i32);

#[derive(Debug, Default)]
struct BrokerState {
    /// Append-only log per (topic, partition).
    logs: HashMap<PartitionKey, Vec<(String, Vec<u8>)>>,
    /// Commit progress per (group, topic, partition).
    groups: HashMap<(String, String, i32), GroupCursor>,
}

/// Commits need not arrive in order: a skipped message leaves a gap that later
/// commits must not paper over.
#[derive(Debug, Default)]
struct GroupCursor {
    /// Every index below this one is committed.
    low_water: u64,
    /// Committed indices above `low_water`.
    ahead: BTreeSet<u64>,
}

impl GroupCursor {
    fn commit(&mut self, index: u64) {
        if index < self.low_water {
            return;
        }
        self.ahead.insert(index);
        while self.ahead.remove(&self.low_water) {
            self.low_water += 1;
        }
    }

    fn is_committed(&self, index: u64) -> bool {
        index < self.low_water || self.ahead.contains(&index)
    }
}

/// In-memory partitioned log with consumer-group commits.
///
/// - No IO
/// - Messages are retained forever (no retention)
/// - A new reader resumes at its group's lowest uncommitted index and skips
///   messages committed out of order, so anything fetched but never committed
///   is redelivered
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    appended: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a reader for `group` on `(topic, partition)`.
    pub fn reader(
        self: &Arc<Self>,
        group: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
    ) -> Result<InMemoryReader, BrokerError> {
        let group = group.into();
        let topic = topic.into();
        let cursor = self.committed_index(&group, &topic, partition)?;

        Ok(InMemoryReader {
            broker: Arc::clone(self),
            group,
            topic,
            partition,
            cursor,
        })
    }

    /// Snapshot of every message written to `(topic, partition)`, in order.
    pub fn messages(&self, topic: &str, partition: i32) -> Result<Vec<BrokerMessage>, BrokerError> {
        let state = self.state.lock().map_err(|_| BrokerError::Poisoned)?;
        let Some(log) = state.logs.get(&(topic.to_string(), partition)) else {
            return Ok(Vec::new());
        };

        Ok(log
            .iter()
            .enumerate()
            .map(|(idx, (key, value))| BrokerMessage {
                topic: topic.to_string(),
                partition,
                position: idx.to_string(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    /// Index of the first message not yet committed by `group`.
    pub fn committed_index(&self, group: &str, topic: &str, partition: i32) -> Result<u64, BrokerError> {
        let state = self.state.lock().map_err(|_| BrokerError::Poisoned)?;
        Ok(state
            .groups
            .get(&(group.to_string(), topic.to_string(), partition))
            .map_or(0, |cursor| cursor.low_water))
    }

    /// First message at or after `from` that `group` has not committed.
    fn next_uncommitted(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        from: u64,
    ) -> Result<Option<(u64, BrokerMessage)>, BrokerError> {
        let state = self.state.lock().map_err(|_| BrokerError::Poisoned)?;
        let Some(log) = state.logs.get(&(topic.to_string(), partition)) else {
            return Ok(None);
        };
        let cursor = state
            .groups
            .get(&(group.to_string(), topic.to_string(), partition));

        let found = (from..log.len() as u64)
            .find(|idx| !cursor.is_some_and(|c| c.is_committed(*idx)))
            .map(|idx| {
                let (key, value) = &log[idx as usize];
                (
                    idx,
                    BrokerMessage {
                        topic: topic.to_string(),
                        partition,
                        position: idx.to_string(),
                        key: key.clone(),
                        value: value.clone(),
                    },
                )
            });
        Ok(found)
    }

    fn commit(&self, group: &str, message: &BrokerMessage) -> Result<(), BrokerError> {
        let index: u64 = message
            .position
            .parse()
            .map_err(|_| BrokerError::Commit(format!("unknown position '{}'", message.position)))?;

        let mut state = self.state.lock().map_err(|_| BrokerError::Poisoned)?;
        state
            .groups
            .entry((group.to_string(), message.topic.clone(), message.partition))
            .or_default()
            .commit(index);
        Ok(())
    }
}

#[async_trait]
impl MessageWriter for InMemoryBroker {
    async fn write_message(
        &self,
        topic: &str,
        partition: i32,
        key: &str,
        value: &[u8],
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().map_err(|_| BrokerError::Poisoned)?;
            state
                .logs
                .entry((topic.to_string(), partition))
                .or_default()
                .push((key.to_string(), value.to_vec()));
        }
        self.appended.notify_waiters();
        Ok(())
    }
}

/// Reader bound to one consumer group and one `(topic, partition)`.
#[derive(Debug)]
pub struct InMemoryReader {
    broker: Arc<InMemoryBroker>,
    group: String,
    topic: String,
    partition: i32,
    cursor: u64,
}

#[async_trait]
impl MessageReader for InMemoryReader {
    async fn fetch_message(&mut self) -> Result<BrokerMessage, BrokerError> {
        loop {
            // Register interest before looking, so a write between the lookup and
            // the await is not missed.
            let appended = self.broker.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some((index, message)) =
                self.broker
                    .next_uncommitted(&self.group, &self.topic, self.partition, self.cursor)?
            {
                self.cursor = index + 1;
                return Ok(message);
            }

            appended.await;
        }
    }

    async fn commit_message(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.broker.commit(&self.group, message)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn reader_sees_messages_in_write_order() {
        let broker = InMemoryBroker::new();
        broker.write_message("t", 0, "1", b"a").await.unwrap();
        broker.write_message("t", 0, "2", b"b").await.unwrap();
        broker.write_message("t", 1, "3", b"c").await.unwrap();

        let mut reader = broker.reader("g", "t", 0).unwrap();
        assert_eq!(reader.fetch_message().await.unwrap().key, "1");
        assert_eq!(reader.fetch_message().await.unwrap().key, "2");
    }

    #[tokio::test]
    async fn fetch_waits_for_a_later_write() {
        let broker = InMemoryBroker::new();
        let mut reader = broker.reader("g", "t", 0).unwrap();

        let writer = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.write_message("t", 0, "9", b"late").await.unwrap();
        });

        let msg = tokio::time::timeout(Duration::from_secs(2), reader.fetch_message())
            .await
            .expect("fetch should wake up on write")
            .unwrap();
        assert_eq!(msg.value, b"late");
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered_to_the_next_reader() {
        let broker = InMemoryBroker::new();
        for key in ["1", "2", "3"] {
            broker.write_message("t", 0, key, b"{}").await.unwrap();
        }

        let mut first = broker.reader("g", "t", 0).unwrap();
        let m1 = first.fetch_message().await.unwrap();
        first.commit_message(&m1).await.unwrap();
        let _m2 = first.fetch_message().await.unwrap();
        drop(first);

        assert_eq!(broker.committed_index("g", "t", 0).unwrap(), 1);

        let mut second = broker.reader("g", "t", 0).unwrap();
        assert_eq!(second.fetch_message().await.unwrap().key, "2");

        // Other groups keep their own position.
        let mut other = broker.reader("audit", "t", 0).unwrap();
        assert_eq!(other.fetch_message().await.unwrap().key, "1");
    }

    #[tokio::test]
    async fn a_later_commit_does_not_swallow_an_earlier_gap() {
        let broker = InMemoryBroker::new();
        for key in ["1", "2", "3"] {
            broker.write_message("t", 0, key, b"{}").await.unwrap();
        }

        let mut first = broker.reader("g", "t", 0).unwrap();
        let _skipped = first.fetch_message().await.unwrap();
        let m2 = first.fetch_message().await.unwrap();
        first.commit_message(&m2).await.unwrap();
        drop(first);

        assert_eq!(broker.committed_index("g", "t", 0).unwrap(), 0);

        // Only the gap and the never-fetched tail come back.
        let mut second = broker.reader("g", "t", 0).unwrap();
        let m1 = second.fetch_message().await.unwrap();
        assert_eq!(m1.key, "1");
        assert_eq!(second.fetch_message().await.unwrap().key, "3");

        second.commit_message(&m1).await.unwrap();
        assert_eq!(broker.committed_index("g", "t", 0).unwrap(), 2);
    }
}
