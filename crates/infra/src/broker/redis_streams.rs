//! Redis Streams broker (durable, at-least-once delivery).
//!
//! - **Stream key**: `{topic}:{partition}`, one stream per partition
//! - **Entry fields**: `key` (decimal event id) and `value` (JSON payload)
//! - **Consumer groups**: one per consuming service, created with `MKSTREAM`
//! - **Commit**: `XACK` of the entry id
//!
//! A reader first re-reads its own pending entries (delivered to this consumer
//! name but never acknowledged, e.g. before a crash), then switches to new
//! entries (`>`). Entries stay pending until acknowledged, so a message whose
//! processing failed is redelivered on the next reader session.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use tracing::{debug, instrument, warn};

use ratewatch_events::{BrokerError, BrokerMessage, MessageReader, MessageWriter};

/// How long one `XREADGROUP` blocks before the reader asks again.
const BLOCK_MS: u64 = 5_000;

pub fn stream_key(topic: &str, partition: i32) -> String {
    format!("{topic}:{partition}")
}

async fn connect(client: &redis::Client) -> Result<MultiplexedConnection, BrokerError> {
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| BrokerError::Connection(e.to_string()))
}

fn open(redis_url: &str) -> Result<redis::Client, BrokerError> {
    redis::Client::open(redis_url).map_err(|e| BrokerError::Connection(e.to_string()))
}

#[derive(Clone)]
pub struct RedisStreamsWriter {
    conn: MultiplexedConnection,
}

impl RedisStreamsWriter {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = open(redis_url)?;
        Ok(Self {
            conn: connect(&client).await?,
        })
    }
}

#[async_trait]
impl MessageWriter for RedisStreamsWriter {
    #[instrument(skip(self, value), fields(stream = %stream_key(topic, partition)), err)]
    async fn write_message(
        &self,
        topic: &str,
        partition: i32,
        key: &str,
        value: &[u8],
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _id: String = redis::cmd("XADD")
            .arg(stream_key(topic, partition))
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("value")
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Write(format!("XADD failed: {e}")))?;

        Ok(())
    }
}

pub struct RedisStreamsReader {
    conn: MultiplexedConnection,
    topic: String,
    partition: i32,
    stream: String,
    group: String,
    consumer: String,
    /// Last pending entry handed out; `None` once the backlog is drained.
    pending_cursor: Option<String>,
}

impl RedisStreamsReader {
    /// Connect and make sure the consumer group exists (idempotent).
    pub async fn connect(
        redis_url: &str,
        group: &str,
        consumer: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Self, BrokerError> {
        let client = open(redis_url)?;
        let mut conn = connect(&client).await?;
        let stream = stream_key(topic, partition);

        // "0" so a fresh group also sees entries written before it existed.
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(_) => debug!(stream = %stream, group, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(BrokerError::Connection(format!("XGROUP CREATE failed: {e}"))),
        }

        Ok(Self {
            conn,
            topic: topic.to_string(),
            partition,
            stream,
            group: group.to_string(),
            consumer: consumer.to_string(),
            pending_cursor: Some("0".to_string()),
        })
    }

    async fn read_one(&mut self, id: &str, block: bool) -> Result<Option<StreamId>, BrokerError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);
        if block {
            cmd.arg("BLOCK").arg(BLOCK_MS);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(id);

        // A blocking read that times out replies with nil.
        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| BrokerError::Fetch(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next()))
    }

    fn to_message(&self, entry: StreamId) -> Result<BrokerMessage, BrokerError> {
        let key: String = entry
            .get("key")
            .ok_or_else(|| BrokerError::Fetch(format!("entry {} has no key field", entry.id)))?;
        let value: Vec<u8> = entry
            .get("value")
            .ok_or_else(|| BrokerError::Fetch(format!("entry {} has no value field", entry.id)))?;

        Ok(BrokerMessage {
            topic: self.topic.clone(),
            partition: self.partition,
            position: entry.id,
            key,
            value,
        })
    }
}

#[async_trait]
impl MessageReader for RedisStreamsReader {
    async fn fetch_message(&mut self) -> Result<BrokerMessage, BrokerError> {
        if let Some(cursor) = self.pending_cursor.clone() {
            match self.read_one(&cursor, false).await? {
                Some(entry) => {
                    self.pending_cursor = Some(entry.id.clone());
                    warn!(stream = %self.stream, id = %entry.id, "redelivering unacknowledged entry");
                    return self.to_message(entry);
                }
                None => self.pending_cursor = None,
            }
        }

        loop {
            if let Some(entry) = self.read_one(">", true).await? {
                return self.to_message(entry);
            }
        }
    }

    async fn commit_message(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let acked: u64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&message.position)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| BrokerError::Commit(format!("XACK failed: {e}")))?;

        if acked == 0 {
            debug!(stream = %self.stream, id = %message.position, "entry was already acknowledged");
        }
        Ok(())
    }
}
