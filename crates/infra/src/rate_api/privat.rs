//! PrivatBank cash rates (api.privatbank.ua).

use async_trait::async_trait;
use serde::Deserialize;

use ratewatch_core::CurrencyCode;

use super::{decode_error, get_body, RateError, RateFetcher};

const NAME: &str = "api.privatbank.ua";
const URL: &str = "https://api.privatbank.ua/p24api/pubinfo?json&exchange&coursid=5";

#[derive(Debug, Deserialize)]
struct Entry {
    ccy: String,
    base_ccy: String,
    buy: String,
}

#[derive(Debug, Clone)]
pub struct PrivatFetcher {
    client: reqwest::Client,
}

impl PrivatFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateFetcher for PrivatFetcher {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<String, RateError> {
        let body = get_body(&self.client, NAME, URL).await?;
        parse(&body, base, target)
    }
}

fn parse(body: &str, base: &CurrencyCode, target: &CurrencyCode) -> Result<String, RateError> {
    let entries: Vec<Entry> =
        serde_json::from_str(body).map_err(|e| decode_error(NAME, e.to_string()))?;
    if entries.is_empty() {
        return Err(decode_error(NAME, "no data in response"));
    }

    entries
        .into_iter()
        .find(|e| e.ccy.eq_ignore_ascii_case(base.as_str()) && e.base_ccy.eq_ignore_ascii_case(target.as_str()))
        .map(|e| e.buy)
        .ok_or_else(|| decode_error(NAME, format!("no {base}/{target} pair in response")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"[
        {"ccy":"EUR","base_ccy":"UAH","buy":"44.10000","sale":"45.10000"},
        {"ccy":"USD","base_ccy":"UAH","buy":"41.05000","sale":"41.65000"}
    ]"#;

    fn code(c: &str) -> CurrencyCode {
        CurrencyCode::parse(c).unwrap()
    }

    #[test]
    fn picks_the_requested_pair() {
        assert_eq!(parse(BODY, &code("USD"), &code("UAH")).unwrap(), "41.05000");
        assert_eq!(parse(BODY, &code("EUR"), &code("UAH")).unwrap(), "44.10000");
    }

    #[test]
    fn missing_pair_or_empty_body_is_an_error() {
        assert!(parse(BODY, &code("GBP"), &code("UAH")).is_err());
        assert!(parse("[]", &code("USD"), &code("UAH")).is_err());
    }
}
