//! Infrastructure layer: stores, broker transport, rate providers, workers.

pub mod config;
pub mod consumer;
pub mod db;
pub mod ledger;
pub mod notifier;
pub mod outbox;
pub mod publisher;
pub mod rate_api;
pub mod saga;
pub mod sender;
pub mod subscriptions;
pub mod workers;

/// Redis Streams transport for the broker traits.
#[cfg(feature = "redis")]
pub mod broker;
