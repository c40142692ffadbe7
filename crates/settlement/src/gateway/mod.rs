//! Outbound calls to the payment gateway.

pub mod memory;
pub mod paystack;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Currency, Money};
use ledger::{Provider, Reference};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryGateway;
pub use paystack::{PaystackClient, PaystackConfig};

/// Errors from the gateway.
///
/// Only `Rejected` is a definite answer; everything else means "unresolved,
/// try again later" and must never be read as a failed payment.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network failure, 5xx, or a response that could not be understood.
    #[error("Transient gateway error: {0}")]
    Transient(String),

    /// The call did not finish within the caller's budget.
    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),

    /// The gateway explicitly refused the request.
    #[error("Gateway rejected request: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::Rejected(_))
    }
}

/// Gateway-reported status of a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Success,
    Failed,
    Abandoned,
    /// Still in flight (pending, ongoing, processing, queued).
    Pending,
    /// Anything else the gateway reports.
    Unknown(String),
}

impl RemoteStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => RemoteStatus::Success,
            "failed" => RemoteStatus::Failed,
            "abandoned" => RemoteStatus::Abandoned,
            "pending" | "ongoing" | "processing" | "queued" => RemoteStatus::Pending,
            other => RemoteStatus::Unknown(other.to_string()),
        }
    }

    /// Returns true for a definite negative outcome.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, RemoteStatus::Failed | RemoteStatus::Abandoned)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Success => "success",
            RemoteStatus::Failed => "failed",
            RemoteStatus::Abandoned => "abandoned",
            RemoteStatus::Pending => "pending",
            RemoteStatus::Unknown(other) => other,
        }
    }
}

/// A charge outcome as reported by an authenticated gateway source: a
/// verify call or a signed notification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCharge {
    pub status: RemoteStatus,
    pub amount_minor: i64,

    /// Currency code exactly as the gateway reported it.
    pub currency: String,
    pub metadata: serde_json::Value,

    /// Full gateway payload, stored for audit.
    pub raw: serde_json::Value,
}

impl VerifiedCharge {
    /// Returns true if the charge is for exactly `amount`.
    pub fn amount_matches(&self, amount: &Money) -> bool {
        self.amount_minor == amount.minor()
    }

    /// Returns true if the reported currency is `currency`.
    pub fn currency_matches(&self, currency: &Currency) -> bool {
        Currency::new(&self.currency).is_ok_and(|c| &c == currency)
    }
}

/// Input for starting a hosted checkout.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub email: String,
    pub amount: Money,
    pub reference: Reference,
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// Handle the client uses to open the hosted checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

/// An external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// The provider identifier stored on transactions charged through this
    /// gateway.
    fn provider(&self) -> Provider;

    /// Starts a hosted charge. No local state changes.
    async fn initialize(&self, charge: &ChargeRequest) -> Result<Authorization, GatewayError>;

    /// Looks up the outcome of a charge by reference.
    async fn verify(&self, reference: &Reference) -> Result<VerifiedCharge, GatewayError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    fn provider(&self) -> Provider {
        (**self).provider()
    }

    async fn initialize(&self, charge: &ChargeRequest) -> Result<Authorization, GatewayError> {
        (**self).initialize(charge).await
    }

    async fn verify(&self, reference: &Reference) -> Result<VerifiedCharge, GatewayError> {
        (**self).verify(reference).await
    }
}

/// A gateway chosen at startup.
pub type SharedGateway = Arc<dyn PaymentGateway>;

/// Runs a gateway call under a time budget. Elapsed time is a transient
/// error.
pub async fn with_timeout<T, F>(budget: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::time::timeout(budget, call)
        .await
        .unwrap_or(Err(GatewayError::Timeout(budget)))
}

pub(crate) fn record_request(operation: &'static str, result: &Result<impl Sized, GatewayError>) {
    let result = match result {
        Ok(_) => "ok",
        Err(GatewayError::Rejected(_)) => "rejected",
        Err(GatewayError::Timeout(_)) => "timeout",
        Err(GatewayError::Transient(_)) => "transient",
    };
    metrics::counter!("gateway_requests_total", "operation" => operation, "result" => result)
        .increment(1);
}
