//! Process configuration, read from environment variables.
//!
//! Every variable has a default suited to local development; only values that
//! are present but malformed are errors.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use thiserror::Error;

use ratewatch_core::CurrencyCode;

use crate::notifier::DEFAULT_BATCH_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres stores when set, in-memory stores otherwise.
    pub database_url: Option<String>,
    /// Redis Streams broker when set (and built with `redis`).
    pub redis_url: Option<String>,
    pub http_addr: SocketAddr,
    pub topic: String,
    pub partition: i32,
    pub consumer_group: String,
    /// Stable per instance, so a restarted reader picks up its own backlog.
    pub consumer_name: String,
    pub publish_interval: Duration,
    pub batch_size: usize,
    pub base: CurrencyCode,
    pub target: CurrencyCode,
    /// Daily trigger time, UTC.
    pub notify_at: NaiveTime,
    pub rate_http_timeout: Duration,
    /// `None` disables outbox pruning.
    pub outbox_retention: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let retention_hours: u64 = parse_or(&get, "OUTBOX_RETENTION_HOURS", 24)?;

        Ok(Self {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            http_addr: parse_or(&get, "HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            topic: get("OUTBOX_TOPIC").unwrap_or_else(|| "rate-notifications".to_string()),
            partition: parse_or(&get, "OUTBOX_PARTITION", 0)?,
            consumer_group: get("CONSUMER_GROUP").unwrap_or_else(|| "email-senders".to_string()),
            consumer_name: get("CONSUMER_NAME").unwrap_or_else(|| "ratewatch-1".to_string()),
            publish_interval: Duration::from_secs(positive(
                "PUBLISH_INTERVAL_SECS",
                parse_or(&get, "PUBLISH_INTERVAL_SECS", 10)?,
            )?),
            batch_size: positive("NOTIFY_BATCH_SIZE", parse_or(&get, "NOTIFY_BATCH_SIZE", DEFAULT_BATCH_SIZE)?)?,
            base: currency(&get, "RATE_BASE", "USD")?,
            target: currency(&get, "RATE_TARGET", "UAH")?,
            notify_at: {
                let raw = get("NOTIFY_AT").unwrap_or_else(|| "10:00".to_string());
                NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                    .map_err(|e| invalid("NOTIFY_AT", &raw, e))?
            },
            rate_http_timeout: Duration::from_secs(positive(
                "RATE_HTTP_TIMEOUT_SECS",
                parse_or(&get, "RATE_HTTP_TIMEOUT_SECS", 5)?,
            )?),
            outbox_retention: (retention_hours > 0)
                .then(|| Duration::from_secs(retention_hours * 3600)),
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| invalid(var, &raw, e)),
    }
}

fn positive<T>(var: &'static str, value: T) -> Result<T, ConfigError>
where
    T: Default + PartialEq + ToString,
{
    if value == T::default() {
        return Err(invalid(var, &value.to_string(), "must be greater than zero"));
    }
    Ok(value)
}

fn currency<G>(get: &G, var: &'static str, default: &str) -> Result<CurrencyCode, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let raw = get(var).unwrap_or_else(|| default.to_string());
    CurrencyCode::parse(&raw).map_err(|e| invalid(var, &raw, e))
}
