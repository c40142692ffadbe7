//! Payment coordinator: the entry points the HTTP layer calls.
//!
//! Every path here is a thin caller of [`SettlementEngine::settle`]; none of
//! them writes to the order tables directly.

use std::time::Duration;

use chrono::Utc;
use common::{Principal, SessionId};
use domain::OrderRepository;
use ledger::{Reference, Transaction, TransactionLedger, TransactionStatus, UnresolvedQuery};

use crate::checkout::{CheckoutConfig, CheckoutHandle, CheckoutService};
use crate::engine::{SettleOutcome, SettlementEngine};
use crate::error::{Result, SettlementError};
use crate::gateway::{PaymentGateway, with_timeout};
use crate::notification::Notification;
use crate::signature::SignatureVerifier;
use crate::sweeper::{SweepConfig, SweepReport, Sweeper};
use crate::watcher::{LocalStatusSource, StatusSnapshot, read_status};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub checkout: CheckoutConfig,
    pub sweep: SweepConfig,

    /// Budget for every outbound gateway call.
    pub gateway_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            checkout: CheckoutConfig::default(),
            sweep: SweepConfig::default(),
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

/// What happened to an authenticated notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    /// Not an event that settles anything.
    Ignored { event: String },
    Processed(SettleOutcome),
}

fn record_notification(result: &'static str) {
    metrics::counter!("webhook_notifications_total", "result" => result).increment(1);
}

/// Wires checkout, settlement, reconciliation and status together.
pub struct PaymentCoordinator<L, O: OrderRepository, G> {
    engine: SettlementEngine<L, O>,
    gateway: G,
    verifier: SignatureVerifier,
    checkout: CheckoutService<L, O, G>,
    sweeper: Sweeper<L, O, G>,
    config: CoordinatorConfig,
}

impl<L, O, G> PaymentCoordinator<L, O, G>
where
    L: TransactionLedger + Clone,
    O: OrderRepository + Clone,
    G: PaymentGateway + Clone,
{
    pub fn new(
        ledger: L,
        orders: O,
        gateway: G,
        verifier: SignatureVerifier,
        config: CoordinatorConfig,
    ) -> Self {
        let engine = SettlementEngine::new(ledger.clone(), orders.clone());
        let checkout = CheckoutService::new(
            ledger,
            orders,
            gateway.clone(),
            config.checkout.clone(),
            config.gateway_timeout,
        );
        let sweeper = Sweeper::new(
            engine.clone(),
            gateway.clone(),
            config.sweep.clone(),
            config.gateway_timeout,
        );
        Self {
            engine,
            gateway,
            verifier,
            checkout,
            sweeper,
            config,
        }
    }

    pub fn engine(&self) -> &SettlementEngine<L, O> {
        &self.engine
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// A status source bound to `principal`, for in-process watchers.
    pub fn status_source(&self, principal: Principal) -> LocalStatusSource<L, O> {
        LocalStatusSource::new(
            self.engine.ledger().clone(),
            self.engine.orders().clone(),
            self.gateway.provider(),
            principal,
        )
    }

    pub async fn checkout(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<CheckoutHandle> {
        self.checkout.checkout(principal, session_id).await
    }

    /// Handles a webhook delivery.
    ///
    /// `body` must be the exact bytes received. Nothing is parsed or written
    /// before the signature checks out.
    #[tracing::instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn handle_notification(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<NotificationOutcome> {
        if let Err(e) = self.verifier.verify(body, signature) {
            tracing::warn!(error = %e, "rejected webhook with bad signature");
            record_notification("rejected");
            return Err(e.into());
        }

        let notification = match Notification::parse(body) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!(error = %e, "malformed webhook body");
                record_notification("malformed");
                return Err(e);
            }
        };

        let (reference, charge) = match notification {
            Notification::Ignored { event } => {
                tracing::debug!(%event, "ignoring webhook event");
                record_notification("ignored");
                return Ok(NotificationOutcome::Ignored { event });
            }
            Notification::Foreign { reference } => {
                tracing::warn!(%reference, "webhook for a reference this service never issues");
                record_notification("processed");
                return Ok(NotificationOutcome::Processed(SettleOutcome::UnknownReference));
            }
            Notification::Charge { reference, charge } => (reference, charge),
        };

        match self
            .engine
            .settle(&self.gateway.provider(), &reference, &charge)
            .await
        {
            Ok(settlement) => {
                record_notification("processed");
                Ok(NotificationOutcome::Processed(settlement.outcome))
            }
            Err(e) => {
                tracing::error!(%reference, error = %e, "webhook settlement failed");
                record_notification("error");
                Err(e)
            }
        }
    }

    async fn owned_transaction(
        &self,
        principal: &Principal,
        reference: &Reference,
    ) -> Result<Transaction> {
        let transaction = self
            .engine
            .ledger()
            .find_by_reference(&self.gateway.provider(), reference)
            .await?
            .ok_or_else(|| SettlementError::TransactionNotFound(reference.clone()))?;
        if !transaction.is_owned_by(principal.user_id) {
            return Err(SettlementError::unauthorized("verify this payment"));
        }
        Ok(transaction)
    }

    /// User-driven verification after returning from the hosted checkout.
    ///
    /// Gateway trouble is "still confirming" (`paid: false`), never an
    /// error.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id, reference = %reference))]
    pub async fn verify(
        &self,
        principal: &Principal,
        reference: &Reference,
    ) -> Result<StatusSnapshot> {
        let transaction = self.owned_transaction(principal, reference).await?;
        let mut snapshot = StatusSnapshot {
            found: true,
            session_id: transaction.links.session_id,
            request_id: transaction.links.request_id,
            ..Default::default()
        };

        match transaction.status {
            TransactionStatus::Success => {
                self.engine.ensure_cascade(&transaction).await?;
                snapshot.paid = true;
            }
            TransactionStatus::Failed => snapshot.failed = true,
            TransactionStatus::Initialized => {
                let charge = match with_timeout(
                    self.config.gateway_timeout,
                    self.gateway.verify(&transaction.reference),
                )
                .await
                {
                    Ok(charge) => charge,
                    Err(e) => {
                        tracing::warn!(error = %e, "verify deferred, gateway unavailable");
                        return Ok(snapshot);
                    }
                };
                let settlement = self
                    .engine
                    .settle(&transaction.provider, &transaction.reference, &charge)
                    .await?;
                snapshot.paid = settlement.outcome.is_paid();
                snapshot.failed = settlement.outcome.is_failed();
            }
        }
        Ok(snapshot)
    }

    /// Gateway-free status read.
    pub async fn status(
        &self,
        principal: &Principal,
        reference: &Reference,
    ) -> Result<StatusSnapshot> {
        read_status(
            self.engine.ledger(),
            self.engine.orders(),
            &self.gateway.provider(),
            principal,
            reference,
        )
        .await
    }

    /// Dashboard reconciliation for the calling user.
    pub async fn reconcile(&self, principal: &Principal) -> Result<SweepReport> {
        self.sweeper.sweep(principal).await
    }

    /// Unresolved transactions too old for the sweep. Admin only.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn stale(&self, principal: &Principal, limit: usize) -> Result<Vec<Transaction>> {
        if !principal.is_admin() {
            return Err(SettlementError::unauthorized("list stale payments"));
        }
        let query = UnresolvedQuery::new()
            .provider(self.gateway.provider())
            .created_before(Utc::now() - self.config.sweep.lookback)
            .limit(limit);
        Ok(self.engine.ledger().find_unresolved(&query).await?)
    }
}
