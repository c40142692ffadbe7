//! Paystack REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ledger::{Provider, Reference};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{
    Authorization, ChargeRequest, GatewayError, PaymentGateway, RemoteStatus, VerifiedCharge,
    record_request,
};

/// Connection settings for [`PaystackClient`].
#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl PaystackConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.paystack.co";

    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Response wrapper used by every Paystack endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: Value,
}

/// [`PaymentGateway`] backed by the Paystack transaction API.
#[derive(Debug, Clone)]
pub struct PaystackClient {
    http: reqwest::Client,
    config: Arc<PaystackConfig>,
}

impl PaystackClient {
    pub fn new(config: PaystackConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transient(format!("http client setup failed: {e}")))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_send_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.config.timeout)
        } else {
            GatewayError::Transient(format!("paystack request failed: {err}"))
        }
    }

    /// Reads the body and unwraps the envelope.
    ///
    /// A non-2xx response is still used when its body parses; 4xx bodies
    /// with `status: false` are refusals, anything unreadable is transient.
    async fn read_envelope<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<(T, Value), GatewayError> {
        let http_status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::Transient(format!(
                "unreadable paystack response ({http_status}): {e}"
            ))
        })?;

        let envelope: Envelope<Value> = serde_json::from_value(body).map_err(|e| {
            GatewayError::Transient(format!(
                "unexpected paystack response ({http_status}): {e}"
            ))
        })?;

        if !envelope.status {
            return Err(if http_status.is_server_error() {
                GatewayError::Transient(envelope.message)
            } else {
                GatewayError::Rejected(envelope.message)
            });
        }

        let raw = envelope.data.unwrap_or(Value::Null);
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(data) => Ok((data, raw)),
            Err(e) if http_status.is_success() => Err(GatewayError::Transient(format!(
                "incomplete paystack data: {e}"
            ))),
            Err(_) => Err(GatewayError::Transient(format!(
                "paystack returned {http_status}"
            ))),
        }
    }

    async fn send_initialize(&self, charge: &ChargeRequest) -> Result<Authorization, GatewayError> {
        let mut body = json!({
            "email": charge.email,
            "amount": charge.amount.minor(),
            "reference": charge.reference.as_str(),
            "currency": charge.amount.currency().as_str(),
            "metadata": charge.metadata,
        });
        if let Some(callback_url) = &charge.callback_url {
            body["callback_url"] = json!(callback_url);
        }

        let response = self
            .http
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let (data, _): (InitializeData, _) = self.read_envelope(response).await?;
        Ok(Authorization {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    async fn send_verify(&self, reference: &Reference) -> Result<VerifiedCharge, GatewayError> {
        // References are restricted to URL-safe characters on parse.
        let response = self
            .http
            .get(self.url(&format!("/transaction/verify/{reference}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let (data, raw): (VerifyData, _) = self.read_envelope(response).await?;
        Ok(VerifiedCharge {
            status: RemoteStatus::parse(&data.status),
            amount_minor: data.amount,
            currency: data.currency,
            metadata: data.metadata,
            raw,
        })
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    fn provider(&self) -> Provider {
        Provider::paystack()
    }

    #[tracing::instrument(skip(self, charge), fields(reference = %charge.reference))]
    async fn initialize(&self, charge: &ChargeRequest) -> Result<Authorization, GatewayError> {
        let result = self.send_initialize(charge).await;
        record_request("initialize", &result);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "paystack initialize failed");
        }
        result
    }

    #[tracing::instrument(skip(self), fields(reference = %reference))]
    async fn verify(&self, reference: &Reference) -> Result<VerifiedCharge, GatewayError> {
        let result = self.send_verify(reference).await;
        record_request("verify", &result);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "paystack verify failed");
        }
        result
    }
}
