//! Minor-unit money and currency codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected currency code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid currency code: {0:?} (expected three ASCII letters)")]
pub struct CurrencyError(pub String);

/// ISO-4217 style currency code, always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parses a three-letter code, normalising to upper-case.
    pub fn new(code: impl AsRef<str>) -> Result<Self, CurrencyError> {
        let code = code.as_ref().trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Nigerian naira, the marketplace's settlement currency.
    pub fn ngn() -> Self {
        Self("NGN".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::ngn()
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// An amount in integer minor units (kobo, cents) of a single currency.
///
/// Amounts are never converted between currencies; two `Money` values are
/// equal only when both the minor units and the currency match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    /// Creates an amount from minor units.
    pub fn from_minor(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    /// Creates an amount from whole major units (e.g. naira → kobo).
    pub fn from_major(major: i64, currency: Currency) -> Self {
        Self {
            minor: major * 100,
            currency,
        }
    }

    /// Returns the amount in minor units.
    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Returns true if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    /// Returns true if `minor` and `currency` describe exactly this amount.
    pub fn matches(&self, minor: i64, currency: &Currency) -> bool {
        self.minor == minor && &self.currency == currency
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        write!(f, "{sign}{} {}.{:02}", self.currency, abs / 100, abs % 100)
    }
}
