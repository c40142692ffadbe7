//! In-memory gateway for tests and local runs without gateway credentials.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use ledger::{Provider, Reference};
use serde_json::json;

use super::{Authorization, ChargeRequest, GatewayError, PaymentGateway, RemoteStatus, VerifiedCharge};

#[derive(Debug, Default)]
struct GatewayState {
    charges: HashMap<Reference, VerifiedCharge>,
    initialized: Vec<ChargeRequest>,
    verify_error: Option<GatewayError>,
    initialize_error: Option<GatewayError>,
    latency: Option<Duration>,
    verify_calls: usize,
}

/// Scriptable [`PaymentGateway`].
///
/// Charges are looked up by reference; a reference with no scripted charge
/// verifies as `pending`.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    provider: Provider,
    state: Arc<Mutex<GatewayState>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::for_provider(Provider::paystack())
    }

    pub fn for_provider(provider: Provider) -> Self {
        Self {
            provider,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scripts the outcome returned by `verify` for `reference`.
    pub fn set_charge(&self, reference: &Reference, charge: VerifiedCharge) {
        self.state().charges.insert(reference.clone(), charge);
    }

    /// Scripts a successful charge of exactly `amount`.
    pub fn succeed(&self, reference: &Reference, amount: &Money) {
        self.set_charge(reference, charge(reference, RemoteStatus::Success, amount));
    }

    /// Scripts a charge with the given status for `amount`.
    pub fn resolve(&self, reference: &Reference, status: RemoteStatus, amount: &Money) {
        self.set_charge(reference, charge(reference, status, amount));
    }

    /// Makes every `verify` call fail with `error` until cleared.
    pub fn set_verify_error(&self, error: Option<GatewayError>) {
        self.state().verify_error = error;
    }

    /// Makes every `initialize` call fail with `error` until cleared.
    pub fn set_initialize_error(&self, error: Option<GatewayError>) {
        self.state().initialize_error = error;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Charges started through `initialize`, oldest first.
    pub fn initialized(&self) -> Vec<ChargeRequest> {
        self.state().initialized.clone()
    }

    pub fn verify_calls(&self) -> usize {
        self.state().verify_calls
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Builds the payload a gateway would report for `amount`.
pub fn charge(reference: &Reference, status: RemoteStatus, amount: &Money) -> VerifiedCharge {
    let currency = amount.currency().as_str().to_string();
    VerifiedCharge {
        raw: json!({
            "reference": reference.as_str(),
            "status": status.as_str(),
            "amount": amount.minor(),
            "currency": currency,
        }),
        status,
        amount_minor: amount.minor(),
        currency,
        metadata: serde_json::Value::Null,
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn provider(&self) -> Provider {
        self.provider.clone()
    }

    async fn initialize(&self, charge: &ChargeRequest) -> Result<Authorization, GatewayError> {
        self.delay().await;
        let mut state = self.state();
        if let Some(error) = &state.initialize_error {
            return Err(error.clone());
        }
        state.initialized.push(charge.clone());
        let n = state.initialized.len();

        Ok(Authorization {
            authorization_url: format!("https://checkout.invalid/{}", charge.reference),
            access_code: format!("AC{n:06}"),
            reference: charge.reference.to_string(),
        })
    }

    async fn verify(&self, reference: &Reference) -> Result<VerifiedCharge, GatewayError> {
        self.delay().await;
        let mut state = self.state();
        state.verify_calls += 1;
        if let Some(error) = &state.verify_error {
            return Err(error.clone());
        }
        Ok(state.charges.get(reference).cloned().unwrap_or_else(|| VerifiedCharge {
            status: RemoteStatus::Pending,
            amount_minor: 0,
            currency: String::new(),
            metadata: serde_json::Value::Null,
            raw: json!({ "reference": reference.as_str(), "status": "pending" }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use common::Currency;

    use super::*;

    fn reference() -> Reference {
        Reference::parse("LC_test_1").unwrap()
    }

    #[tokio::test]
    async fn unscripted_reference_is_pending() {
        let gateway = InMemoryGateway::new();
        let charge = gateway.verify(&reference()).await.unwrap();
        assert_eq!(charge.status, RemoteStatus::Pending);
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_success_round_trips() {
        let gateway = InMemoryGateway::new();
        let amount = Money::from_major(5000, Currency::ngn());
        gateway.succeed(&reference(), &amount);

        let charge = gateway.verify(&reference()).await.unwrap();
        assert_eq!(charge.status, RemoteStatus::Success);
        assert!(charge.amount_matches(&amount));
        assert!(charge.currency_matches(&Currency::ngn()));
    }

    #[tokio::test]
    async fn scripted_errors() {
        let gateway = InMemoryGateway::new();
        gateway.set_verify_error(Some(GatewayError::Transient("down".into())));
        assert!(gateway.verify(&reference()).await.is_err());

        gateway.set_verify_error(None);
        assert!(gateway.verify(&reference()).await.is_ok());
    }

    #[tokio::test]
    async fn initialize_records_charge() {
        let gateway = InMemoryGateway::new();
        let request = ChargeRequest {
            email: "ada@example.com".into(),
            amount: Money::from_major(5000, Currency::ngn()),
            reference: reference(),
            callback_url: None,
            metadata: serde_json::Value::Null,
        };

        let auth = gateway.initialize(&request).await.unwrap();
        assert_eq!(auth.reference, "LC_test_1");
        assert_eq!(auth.access_code, "AC000001");
        assert_eq!(gateway.initialized().len(), 1);
    }
}
