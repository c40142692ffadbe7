//! Starting a hosted checkout for a session.

use std::time::Duration;

use chrono::Utc;
use common::{Currency, Principal, RequestId, SessionId};
use domain::{OrderRepository, OrderService};
use ledger::{LedgerError, NewTransaction, Reference, Transaction, TransactionLedger};
use serde::Serialize;
use serde_json::json;

use crate::error::{Result, SettlementError};
use crate::gateway::{ChargeRequest, PaymentGateway, with_timeout};

/// Fresh references tried before a collision is surfaced.
const MAX_REFERENCE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// The only currency checkouts are accepted in.
    pub currency: Currency,
    pub reference_prefix: String,
    pub callback_url: Option<String>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: Currency::ngn(),
            reference_prefix: "LC".to_string(),
            callback_url: None,
        }
    }
}

/// What the client needs to open the hosted checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutHandle {
    pub reference: Reference,
    pub authorization_url: String,
    pub access_code: String,

    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub email: String,
    pub session_id: SessionId,
    pub request_id: RequestId,
}

/// Records a transaction for a session and asks the gateway for a checkout.
pub struct CheckoutService<L, O: OrderRepository, G> {
    ledger: L,
    orders: OrderService<O>,
    gateway: G,
    config: CheckoutConfig,
    gateway_timeout: Duration,
}

impl<L, O, G> CheckoutService<L, O, G>
where
    L: TransactionLedger,
    O: OrderRepository,
    G: PaymentGateway,
{
    pub fn new(
        ledger: L,
        orders: O,
        gateway: G,
        config: CheckoutConfig,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            orders: OrderService::new(orders),
            gateway,
            config,
            gateway_timeout,
        }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Starts a checkout for a session the principal is the student of.
    ///
    /// The transaction is inserted before the gateway call; if the gateway
    /// then fails it stays `initialized` and ages into the stale listing.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn checkout(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<CheckoutHandle> {
        let email = principal
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(SettlementError::MissingEmail)?
            .to_string();

        let (session, request) = self.orders.session_for_payment(principal, session_id).await?;
        if !request.status.can_checkout() {
            return Err(SettlementError::InvalidState(format!(
                "request is {}",
                request.status
            )));
        }
        if session.payment_status.is_paid() {
            return Err(SettlementError::InvalidState(
                "session is already paid".to_string(),
            ));
        }
        if session.price.currency() != &self.config.currency {
            return Err(SettlementError::Validation(format!(
                "session is priced in {}, checkout only accepts {}",
                session.price.currency(),
                self.config.currency
            )));
        }
        if !session.price.is_positive() {
            return Err(SettlementError::Validation(
                "session has no price".to_string(),
            ));
        }

        let mut attempt = 0;
        let transaction = loop {
            attempt += 1;
            let reference =
                Reference::generate(&self.config.reference_prefix, session.id, Utc::now())?;
            let new = NewTransaction::new(self.gateway.provider(), reference, session.price.clone())
                .session(session.id)
                .request(request.id)
                .student(session.student_id)
                .teacher(session.teacher_id);

            match self.ledger.create(new).await {
                Ok(transaction) => break transaction,
                Err(LedgerError::DuplicateReference(reference))
                    if attempt < MAX_REFERENCE_ATTEMPTS =>
                {
                    tracing::warn!(%reference, attempt, "reference collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        };

        let authorization = with_timeout(
            self.gateway_timeout,
            self.gateway.initialize(&self.charge_request(email.clone(), &transaction)),
        )
        .await?;

        metrics::counter!("checkouts_initiated_total").increment(1);
        tracing::info!(reference = %transaction.reference, "checkout initiated");

        Ok(CheckoutHandle {
            reference: transaction.reference,
            authorization_url: authorization.authorization_url,
            access_code: authorization.access_code,
            amount: transaction.amount.minor(),
            currency: transaction.amount.currency().to_string(),
            email,
            session_id: session.id,
            request_id: request.id,
        })
    }

    fn charge_request(&self, email: String, transaction: &Transaction) -> ChargeRequest {
        ChargeRequest {
            email,
            amount: transaction.amount.clone(),
            reference: transaction.reference.clone(),
            callback_url: self.config.callback_url.clone(),
            metadata: json!({
                "sessionId": transaction.links.session_id,
                "requestId": transaction.links.request_id,
                "studentId": transaction.links.student_id,
                "teacherId": transaction.links.teacher_id,
            }),
        }
    }
}
