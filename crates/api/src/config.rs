//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::{Currency, CurrencyError};
use ledger::{Reference, ReferenceError};
use settlement::{CheckoutConfig, CoordinatorConfig, PaystackConfig, SweepConfig};
use thiserror::Error;

/// Settings that parse but cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PAYMENT_CURRENCY: {0}")]
    Currency(#[from] CurrencyError),

    #[error("PAYMENT_REFERENCE_PREFIX: {0}")]
    ReferencePrefix(#[from] ReferenceError),

    #[error("SWEEP_LOOKBACK_MINUTES out of range: {0}")]
    SweepLookback(i64),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on in-memory stores
/// - `PAYSTACK_SECRET_KEY`: API key and webhook secret; empty rejects every webhook
/// - `PAYSTACK_BASE_URL`: default `https://api.paystack.co`
/// - `PAYSTACK_TIMEOUT_SECS`: gateway call budget (default: `10`)
/// - `PAYMENT_CALLBACK_URL`: where the hosted checkout returns to
/// - `PAYMENT_CURRENCY`: accepted checkout currency (default: `NGN`)
/// - `PAYMENT_REFERENCE_PREFIX`: default `LC`; letters, digits and `-_.=` only
/// - `SWEEP_LOOKBACK_MINUTES`: default `120`; must be positive
/// - `SWEEP_LIMIT`: default `10`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub paystack_secret_key: String,
    pub paystack_base_url: String,
    pub gateway_timeout: Duration,
    pub callback_url: Option<String>,
    pub currency: String,
    pub reference_prefix: String,
    pub sweep_lookback_minutes: i64,
    pub sweep_limit: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed(var("PORT")).unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
                Some(f) if f == "json" => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: var("DATABASE_URL"),
            paystack_secret_key: lookup("PAYSTACK_SECRET_KEY").unwrap_or_default(),
            paystack_base_url: var("PAYSTACK_BASE_URL").unwrap_or(defaults.paystack_base_url),
            gateway_timeout: parsed(var("PAYSTACK_TIMEOUT_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.gateway_timeout),
            callback_url: var("PAYMENT_CALLBACK_URL"),
            currency: var("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
            reference_prefix: var("PAYMENT_REFERENCE_PREFIX").unwrap_or(defaults.reference_prefix),
            sweep_lookback_minutes: parsed(var("SWEEP_LOOKBACK_MINUTES"))
                .unwrap_or(defaults.sweep_lookback_minutes),
            sweep_limit: parsed(var("SWEEP_LIMIT")).unwrap_or(defaults.sweep_limit),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn currency(&self) -> Result<Currency, CurrencyError> {
        Currency::new(&self.currency)
    }

    pub fn paystack(&self) -> PaystackConfig {
        PaystackConfig::new(&self.paystack_secret_key)
            .with_base_url(&self.paystack_base_url)
            .with_timeout(self.gateway_timeout)
    }

    pub fn coordinator(&self) -> Result<CoordinatorConfig, ConfigError> {
        Reference::check_prefix(&self.reference_prefix)?;
        let lookback = Some(self.sweep_lookback_minutes)
            .filter(|minutes| *minutes > 0)
            .and_then(chrono::Duration::try_minutes)
            .ok_or(ConfigError::SweepLookback(self.sweep_lookback_minutes))?;

        Ok(CoordinatorConfig {
            checkout: CheckoutConfig {
                currency: self.currency()?,
                reference_prefix: self.reference_prefix.clone(),
                callback_url: self.callback_url.clone(),
            },
            sweep: SweepConfig {
                lookback,
                limit: self.sweep_limit,
            },
            gateway_timeout: self.gateway_timeout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            paystack_secret_key: String::new(),
            paystack_base_url: PaystackConfig::DEFAULT_BASE_URL.to_string(),
            gateway_timeout: Duration::from_secs(10),
            callback_url: None,
            currency: "NGN".to_string(),
            reference_prefix: "LC".to_string(),
            sweep_lookback_minutes: 120,
            sweep_limit: 10,
        }
    }
}
