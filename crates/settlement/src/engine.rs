//! The settlement engine.
//!
//! Every path that can learn about a payment outcome (webhook, verify,
//! sweep) ends up in [`SettlementEngine::settle`]. The ledger's conditional
//! transition out of `initialized` decides which caller owns the cascade, so
//! concurrent calls for one reference are safe without any other lock.

use common::RequestId;
use domain::{CascadeWrite, OrderRepository, Session};
use ledger::{Provider, Reference, Transaction, TransactionLedger, TransactionStatus};
use serde::Serialize;

use crate::error::Result;
use crate::gateway::{RemoteStatus, VerifiedCharge};

/// Why a reported success was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    AmountMismatch { expected: i64, reported: i64 },
    CurrencyMismatch { expected: String, reported: String },
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::AmountMismatch { .. } => "amount_mismatch",
            ReviewReason::CurrencyMismatch { .. } => "currency_mismatch",
        }
    }
}

/// What the cascade did to the linked session and request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub session: CascadeWrite,
    pub request: CascadeWrite,
}

impl CascadeReport {
    pub fn applied_any(&self) -> bool {
        self.session.is_applied() || self.request.is_applied()
    }

    fn skipped(&self) -> Option<&str> {
        [&self.session, &self.request]
            .into_iter()
            .find_map(|write| match write {
                CascadeWrite::Skipped(reason) => Some(reason.as_str()),
                _ => None,
            })
    }
}

/// Result of one `settle` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// This call moved the transaction to `success` and ran the cascade.
    Settled { cascade: CascadeReport },

    /// Someone else settled first. `repaired` is true if this call had to
    /// finish a cascade that was interrupted.
    AlreadySettled { repaired: bool },

    /// The gateway has no final answer yet.
    Pending,

    /// Reported success does not match the ledger; left `initialized`.
    NeedsReview(ReviewReason),

    /// The transaction is `failed`, now or from before.
    Failed,

    /// No local transaction has this reference.
    UnknownReference,
}

impl SettleOutcome {
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            SettleOutcome::Settled { .. } | SettleOutcome::AlreadySettled { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SettleOutcome::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettleOutcome::Settled { .. } => "settled",
            SettleOutcome::AlreadySettled { .. } => "already_settled",
            SettleOutcome::Pending => "pending",
            SettleOutcome::NeedsReview(_) => "needs_review",
            SettleOutcome::Failed => "failed",
            SettleOutcome::UnknownReference => "unknown_reference",
        }
    }
}

/// Outcome plus the transaction as last read.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub outcome: SettleOutcome,
    pub transaction: Option<Transaction>,
}

impl Settlement {
    fn new(outcome: SettleOutcome, transaction: Transaction) -> Self {
        Self {
            outcome,
            transaction: Some(transaction),
        }
    }
}

fn record_review(reason: &'static str) {
    metrics::counter!("settlement_review_required_total", "reason" => reason).increment(1);
}

/// Applies verified gateway outcomes to the ledger and the order tables.
#[derive(Debug, Clone)]
pub struct SettlementEngine<L, O> {
    ledger: L,
    orders: O,
}

impl<L, O> SettlementEngine<L, O>
where
    L: TransactionLedger,
    O: OrderRepository,
{
    pub fn new(ledger: L, orders: O) -> Self {
        Self { ledger, orders }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    /// Settles `reference` against an outcome from an authenticated source.
    ///
    /// Safe to call any number of times, from any number of tasks.
    #[tracing::instrument(
        skip(self, charge),
        fields(
            reference = %reference,
            remote_status = charge.status.as_str(),
            outcome = tracing::field::Empty
        )
    )]
    pub async fn settle(
        &self,
        provider: &Provider,
        reference: &Reference,
        charge: &VerifiedCharge,
    ) -> Result<Settlement> {
        let settlement = self.settle_inner(provider, reference, charge).await?;

        let outcome = settlement.outcome.as_str();
        tracing::Span::current().record("outcome", outcome);
        metrics::counter!("settlements_total", "outcome" => outcome).increment(1);
        Ok(settlement)
    }

    async fn settle_inner(
        &self,
        provider: &Provider,
        reference: &Reference,
        charge: &VerifiedCharge,
    ) -> Result<Settlement> {
        let Some(transaction) = self.ledger.find_by_reference(provider, reference).await? else {
            tracing::warn!("no local transaction for reference, ignoring");
            return Ok(Settlement {
                outcome: SettleOutcome::UnknownReference,
                transaction: None,
            });
        };

        match transaction.status {
            TransactionStatus::Success => {
                let repaired = self.ensure_cascade(&transaction).await?;
                return Ok(Settlement::new(
                    SettleOutcome::AlreadySettled { repaired },
                    transaction,
                ));
            }
            TransactionStatus::Failed => {
                if charge.status == RemoteStatus::Success {
                    tracing::warn!(
                        transaction_id = %transaction.id,
                        "gateway reports success for a failed transaction, manual review required"
                    );
                    record_review("success_after_failure");
                }
                return Ok(Settlement::new(SettleOutcome::Failed, transaction));
            }
            TransactionStatus::Initialized => {}
        }

        match &charge.status {
            RemoteStatus::Success => {}
            status if status.is_terminal_failure() => {
                return self.fail(transaction, charge).await;
            }
            _ => return Ok(Settlement::new(SettleOutcome::Pending, transaction)),
        }

        if let Some(reason) = Self::mismatch(&transaction, charge) {
            tracing::warn!(
                transaction_id = %transaction.id,
                expected = %transaction.amount,
                reported_amount = charge.amount_minor,
                reported_currency = %charge.currency,
                "reported charge does not match ledger, manual review required"
            );
            record_review(reason.as_str());
            return Ok(Settlement::new(SettleOutcome::NeedsReview(reason), transaction));
        }

        if !self
            .ledger
            .transition_to_success(transaction.id, charge.raw.clone())
            .await?
        {
            return self.reread(provider, transaction).await;
        }

        let cascade = self.cascade(&transaction).await?;
        tracing::info!(
            transaction_id = %transaction.id,
            session = ?cascade.session,
            request = ?cascade.request,
            "payment settled"
        );

        let transaction = self
            .ledger
            .find_by_reference(provider, &transaction.reference)
            .await?
            .unwrap_or(transaction);
        Ok(Settlement::new(SettleOutcome::Settled { cascade }, transaction))
    }

    fn mismatch(transaction: &Transaction, charge: &VerifiedCharge) -> Option<ReviewReason> {
        if !charge.amount_matches(&transaction.amount) {
            return Some(ReviewReason::AmountMismatch {
                expected: transaction.amount.minor(),
                reported: charge.amount_minor,
            });
        }
        if !charge.currency_matches(transaction.amount.currency()) {
            return Some(ReviewReason::CurrencyMismatch {
                expected: transaction.amount.currency().to_string(),
                reported: charge.currency.clone(),
            });
        }
        None
    }

    async fn fail(&self, transaction: Transaction, charge: &VerifiedCharge) -> Result<Settlement> {
        let provider = transaction.provider.clone();
        if self
            .ledger
            .transition_to_failed(transaction.id, charge.raw.clone())
            .await?
        {
            tracing::info!(transaction_id = %transaction.id, "payment failed");
        }
        self.reread(&provider, transaction).await
    }

    /// Reports whatever the winning writer recorded.
    async fn reread(&self, provider: &Provider, transaction: Transaction) -> Result<Settlement> {
        let current = self
            .ledger
            .find_by_reference(provider, &transaction.reference)
            .await?
            .unwrap_or(transaction);

        let outcome = match current.status {
            TransactionStatus::Success => SettleOutcome::AlreadySettled { repaired: false },
            TransactionStatus::Failed => SettleOutcome::Failed,
            TransactionStatus::Initialized => SettleOutcome::Pending,
        };
        Ok(Settlement::new(outcome, current))
    }

    /// The request a transaction pays for, falling back to its session.
    async fn linked_request(
        &self,
        transaction: &Transaction,
        session: Option<&Session>,
    ) -> Result<Option<RequestId>> {
        if let Some(id) = transaction.links.request_id {
            return Ok(Some(id));
        }
        if let Some(session) = session {
            return Ok(Some(session.request_id));
        }
        match transaction.links.session_id {
            Some(id) => Ok(self.orders.get_session(id).await?.map(|s| s.request_id)),
            None => Ok(None),
        }
    }

    /// Marks the session paid, then the request.
    ///
    /// Both writes are idempotent. The request is left alone when the
    /// session refused the amount.
    async fn cascade(&self, transaction: &Transaction) -> Result<CascadeReport> {
        let session = match transaction.links.session_id {
            Some(id) => self.orders.mark_session_paid(id, &transaction.amount).await?,
            None => CascadeWrite::Skipped("transaction has no session".to_string()),
        };

        let request = if transaction.links.session_id.is_some()
            && matches!(session, CascadeWrite::Skipped(_))
        {
            CascadeWrite::Skipped("session was not marked paid".to_string())
        } else {
            match self.linked_request(transaction, None).await? {
                Some(id) => self.orders.mark_request_paid(id).await?,
                None => CascadeWrite::Skipped("transaction has no request".to_string()),
            }
        };

        let report = CascadeReport { session, request };
        if let Some(reason) = report.skipped() {
            tracing::warn!(
                transaction_id = %transaction.id,
                reason,
                "settlement cascade skipped a write, manual review required"
            );
            record_review("cascade_skipped");
        }
        Ok(report)
    }

    /// Read-only completeness check, re-running the cascade only if a
    /// previous owner stopped part-way.
    async fn cascade_complete(&self, transaction: &Transaction) -> Result<bool> {
        let session = match transaction.links.session_id {
            Some(id) => self.orders.get_session(id).await?,
            None => None,
        };
        if session.as_ref().is_some_and(|s| !s.payment_status.is_paid()) {
            return Ok(false);
        }

        if let Some(request_id) = self.linked_request(transaction, session.as_ref()).await?
            && let Some(request) = self.orders.get_request(request_id).await?
            && request.status.can_settle()
        {
            return Ok(false);
        }
        Ok(true)
    }

    /// Makes sure a `success` transaction's cascade has been applied.
    ///
    /// Returns true if anything had to be written.
    pub async fn ensure_cascade(&self, transaction: &Transaction) -> Result<bool> {
        if !transaction.is_success() || self.cascade_complete(transaction).await? {
            return Ok(false);
        }

        let repaired = self.cascade(transaction).await?.applied_any();
        if repaired {
            tracing::warn!(
                transaction_id = %transaction.id,
                reference = %transaction.reference,
                "repaired an interrupted settlement cascade"
            );
            metrics::counter!("settlement_cascade_repairs_total").increment(1);
        }
        Ok(repaired)
    }
}
