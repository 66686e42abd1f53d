//! Outbox records.
//!
//! - `Event` is the unit of outbound work, appended by the notifier and read by the publisher.
//! - `EventData` is the payload carried inside `Event::data` and on the broker wire.
//! - `Offset` is the publisher's own cursor per (topic, partition).
//! - `ConsumedEvent` is the consumer-side idempotency ledger entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of outbound work.
///
/// `id` is assigned by the store and increases with creation order. Events are
/// never mutated after they are appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u64,
    /// Serialized [`EventData`].
    pub data: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Decode the payload carried by this event.
    pub fn payload(&self) -> Result<EventData, serde_json::Error> {
        EventData::from_json(&self.data)
    }
}

/// Notification payload: who receives it and which rate to report.
///
/// Wire form: `{"email": "...", "rate": 41.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub email: String,
    pub rate: f64,
}

impl EventData {
    pub fn new(email: impl Into<String>, rate: f64) -> Self {
        Self {
            email: email.into(),
            rate,
        }
    }

    /// Serialize to the compact JSON form stored in the outbox.
    ///
    /// Fails for non-finite rates, which JSON cannot carry.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        if !self.rate.is_finite() {
            return Err(serde::ser::Error::custom(format!(
                "rate must be finite, got {}",
                self.rate
            )));
        }
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// The publisher's cursor: the last event id successfully handed to the broker
/// for `(topic, partition)`. A missing row means `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Offset {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
}

/// A ledger row recording that the side effect for `id` was performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedEvent {
    pub id: u64,
    pub data: String,
    pub consumed_at: DateTime<Utc>,
}
