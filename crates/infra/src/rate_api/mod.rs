//! Exchange-rate sources and the fallback chain over them.

pub mod coinbase;
pub mod logged;
pub mod nbu;
pub mod privat;

pub use coinbase::CoinbaseFetcher;
pub use logged::{FetchStats, FetchStatsSnapshot, LoggedFetcher};
pub use nbu::NbuFetcher;
pub use privat::PrivatFetcher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use ratewatch_core::CurrencyCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateError {
    /// Transport failure (DNS, TLS, timeout, connection reset).
    #[error("{provider}: request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider}: unexpected status {status}")]
    Status { provider: String, status: u16 },

    /// Body could not be decoded or carried no usable rate.
    #[error("{provider}: bad response: {message}")]
    Decode { provider: String, message: String },

    #[error("no rate providers configured")]
    NoProviders,
}

/// One exchange-rate source.
///
/// Returns the rate as the provider formats it; callers parse it.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    /// Stable name used in logs and counters.
    fn name(&self) -> &str;

    async fn fetch(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<String, RateError>;
}

#[async_trait]
impl<F> RateFetcher for Arc<F>
where
    F: RateFetcher + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<String, RateError> {
        (**self).fetch(base, target).await
    }
}

/// Ordered fallback over several fetchers.
///
/// Links are tried in construction order with the same arguments. The first
/// success wins and later links are not called; each link is tried once. When
/// every link fails, the last link's error is returned.
pub struct FetcherChain {
    links: Vec<Arc<dyn RateFetcher>>,
}

impl FetcherChain {
    pub fn new(links: Vec<Arc<dyn RateFetcher>>) -> Self {
        Self { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[async_trait]
impl RateFetcher for FetcherChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn fetch(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<String, RateError> {
        let mut last_err = RateError::NoProviders;

        for link in &self.links {
            match link.fetch(base, target).await {
                Ok(rate) => return Ok(rate),
                Err(err) => last_err = err,
            }
        }

        Err(last_err)
    }
}

/// Shared HTTP client for the provider links.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, RateError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RateError::Request {
            provider: "http".to_string(),
            message: e.to_string(),
        })
}

/// The production chain: Coinbase → NBU → PrivatBank, each wrapped in logging.
pub fn default_chain(client: reqwest::Client) -> FetcherChain {
    FetcherChain::new(vec![
        Arc::new(LoggedFetcher::new(CoinbaseFetcher::new(client.clone()))),
        Arc::new(LoggedFetcher::new(NbuFetcher::new(client.clone()))),
        Arc::new(LoggedFetcher::new(PrivatFetcher::new(client))),
    ])
}

/// Issue a GET and return the body of a 200 response.
async fn get_body(client: &reqwest::Client, provider: &str, url: &str) -> Result<String, RateError> {
    let response = client.get(url).send().await.map_err(|e| RateError::Request {
        provider: provider.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(RateError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| RateError::Request {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

fn decode_error(provider: &str, message: impl Into<String>) -> RateError {
    RateError::Decode {
        provider: provider.to_string(),
        message: message.into(),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StubFetcher;
    use super::*;

    fn codes() -> (CurrencyCode, CurrencyCode) {
        (CurrencyCode::parse("USD").unwrap(), CurrencyCode::parse("UAH").unwrap())
    }

    #[tokio::test]
    async fn falls_through_to_the_first_success() {
        let (a, b, c) = (
            StubFetcher::failing("a"),
            StubFetcher::failing("b"),
            StubFetcher::ok("c", "24.5"),
        );
        let chain = FetcherChain::new(vec![a.clone(), b.clone(), c.clone()]);
        let (base, target) = codes();

        assert_eq!(chain.fetch(&base, &target).await.unwrap(), "24.5");
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn later_links_are_skipped_after_a_success() {
        let (a, b) = (StubFetcher::ok("a", "41.00"), StubFetcher::ok("b", "99"));
        let chain = FetcherChain::new(vec![a.clone(), b.clone()]);
        let (base, target) = codes();

        assert_eq!(chain.fetch(&base, &target).await.unwrap(), "41.00");
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn all_failing_returns_the_last_error() {
        let chain = FetcherChain::new(vec![
            StubFetcher::failing("a"),
            StubFetcher::failing("b"),
            StubFetcher::failing("c"),
        ]);
        let (base, target) = codes();

        assert_eq!(
            chain.fetch(&base, &target).await.unwrap_err(),
            RateError::Status {
                provider: "c".to_string(),
                status: 503
            }
        );
    }

    #[tokio::test]
    async fn empty_chain_reports_no_providers() {
        let (base, target) = codes();
        assert_eq!(
            FetcherChain::new(Vec::new()).fetch(&base, &target).await.unwrap_err(),
            RateError::NoProviders
        );
    }
}
