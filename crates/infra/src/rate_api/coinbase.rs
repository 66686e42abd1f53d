//! api.coinbase.com spot buy price.

use async_trait::async_trait;
use serde::Deserialize;

use ratewatch_core::CurrencyCode;

use super::{decode_error, get_body, RateError, RateFetcher};

const NAME: &str = "api.coinbase.com";

#[derive(Debug, Deserialize)]
struct Response {
    data: Price,
}

#[derive(Debug, Deserialize)]
struct Price {
    amount: String,
}

#[derive(Debug, Clone)]
pub struct CoinbaseFetcher {
    client: reqwest::Client,
}

impl CoinbaseFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateFetcher for CoinbaseFetcher {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<String, RateError> {
        let url = format!("https://api.coinbase.com/v2/prices/{base}-{target}/buy");
        let body = get_body(&self.client, NAME, &url).await?;
        parse(&body)
    }
}

fn parse(body: &str) -> Result<String, RateError> {
    let response: Response =
        serde_json::from_str(body).map_err(|e| decode_error(NAME, e.to_string()))?;
    if response.data.amount.trim().is_empty() {
        return Err(decode_error(NAME, "empty amount"));
    }
    Ok(response.data.amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_the_amount() {
        let body = r#"{"data":{"amount":"41.23","base":"USD","currency":"UAH"}}"#;
        assert_eq!(parse(body).unwrap(), "41.23");
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(parse(r#"{"errors":[{"id":"not_found"}]}"#).is_err());
        assert!(parse(r#"{"data":{"amount":""}}"#).is_err());
        assert!(parse("<html>").is_err());
    }
}
