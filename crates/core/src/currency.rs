//! ISO-4217-shaped currency codes.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Three ASCII letters, stored upper-case (`USD`, `UAH`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl ValueObject for CurrencyCode {}

impl CurrencyCode {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let code = raw.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::invalid_currency(raw));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn upper_cases_valid_codes() {
        assert_eq!(CurrencyCode::parse("usd").unwrap().as_str(), "USD");
        assert_eq!(CurrencyCode::parse("UAH").unwrap().as_str(), "UAH");
    }

    #[test]
    fn rejects_wrong_shape() {
        for raw in ["", "US", "USDT", "U5D", "€€€"] {
            assert!(CurrencyCode::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    proptest! {
        #[test]
        fn any_three_letters_normalise_to_upper_case(raw in "[a-zA-Z]{3}") {
            let code = CurrencyCode::parse(&raw).unwrap();
            prop_assert_eq!(code.as_str(), raw.to_ascii_uppercase());
        }

        #[test]
        fn other_lengths_are_rejected(raw in "[a-zA-Z]{4,8}|[a-zA-Z]{0,2}") {
            prop_assert!(CurrencyCode::parse(&raw).is_err());
        }
    }
}
