//! National Bank of Ukraine official rate (bank.gov.ua).
//!
//! The NBU publishes rates against UAH only; `target` is not part of the query.

use async_trait::async_trait;
use serde::Deserialize;

use ratewatch_core::CurrencyCode;

use super::{decode_error, get_body, RateError, RateFetcher};

const NAME: &str = "bank.gov.ua";

#[derive(Debug, Deserialize)]
struct Entry {
    rate: f64,
}

#[derive(Debug, Clone)]
pub struct NbuFetcher {
    client: reqwest::Client,
}

impl NbuFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateFetcher for NbuFetcher {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, base: &CurrencyCode, _target: &CurrencyCode) -> Result<String, RateError> {
        let url = format!(
            "https://bank.gov.ua/NBUStatService/v1/statdirectory/exchange?valcode={base}&json"
        );
        let body = get_body(&self.client, NAME, &url).await?;
        parse(&body)
    }
}

fn parse(body: &str) -> Result<String, RateError> {
    let entries: Vec<Entry> =
        serde_json::from_str(body).map_err(|e| decode_error(NAME, e.to_string()))?;
    let first = entries
        .first()
        .ok_or_else(|| decode_error(NAME, "no data in response"))?;
    Ok(format!("{:.6}", first.rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_six_decimals() {
        let body = r#"[{"r030":840,"txt":"Долар США","rate":41.1234,"cc":"USD","exchangedate":"01.06.2024"}]"#;
        assert_eq!(parse(body).unwrap(), "41.123400");
    }

    #[test]
    fn empty_array_is_an_error() {
        assert!(parse("[]").is_err());
    }
}
