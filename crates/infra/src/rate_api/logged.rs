//! Observability decorator for a single rate link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use ratewatch_core::CurrencyCode;

use super::{RateError, RateFetcher};

/// Per-link attempt counters.
#[derive(Debug, Default)]
pub struct FetchStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

impl FetchStats {
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Wraps any [`RateFetcher`], logging and counting each attempt by link name.
pub struct LoggedFetcher<F> {
    inner: F,
    stats: Arc<FetchStats>,
}

impl<F: RateFetcher> LoggedFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            stats: Arc::new(FetchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<FetchStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl<F: RateFetcher> RateFetcher for LoggedFetcher<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<String, RateError> {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);

        match self.inner.fetch(base, target).await {
            Ok(rate) => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                info!(provider = self.name(), %base, %target, rate = %rate, "rate fetched");
                Ok(rate)
            }
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(provider = self.name(), %base, %target, error = %err, "rate fetch failed");
                Err(err)
            }
        }
    }
}
