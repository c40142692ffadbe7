//! Reconciliation sweep for one principal's unresolved transactions.

use std::time::{Duration, Instant};

use chrono::Utc;
use common::Principal;
use domain::OrderRepository;
use ledger::{Transaction, TransactionLedger, UnresolvedQuery};
use serde::Serialize;

use crate::engine::{SettleOutcome, SettlementEngine};
use crate::error::Result;
use crate::gateway::{PaymentGateway, with_timeout};

/// Bounds for a single sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Only transactions created within this window are checked.
    pub lookback: chrono::Duration,

    /// Maximum transactions checked per sweep.
    pub limit: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            lookback: chrono::Duration::minutes(120),
            limit: 10,
        }
    }
}

/// Tally of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub settled: usize,
    pub already_settled: usize,
    pub failed: usize,
    pub pending: usize,
    pub review: usize,
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &SettleOutcome) {
        match outcome {
            SettleOutcome::Settled { .. } => self.settled += 1,
            SettleOutcome::AlreadySettled { .. } => self.already_settled += 1,
            SettleOutcome::Failed => self.failed += 1,
            SettleOutcome::Pending | SettleOutcome::UnknownReference => self.pending += 1,
            SettleOutcome::NeedsReview(_) => self.review += 1,
        }
    }
}

/// Re-verifies recent `initialized` transactions with the gateway.
#[derive(Debug, Clone)]
pub struct Sweeper<L, O, G> {
    engine: SettlementEngine<L, O>,
    gateway: G,
    config: SweepConfig,
    gateway_timeout: Duration,
}

impl<L, O, G> Sweeper<L, O, G>
where
    L: TransactionLedger,
    O: OrderRepository,
    G: PaymentGateway,
{
    pub fn new(
        engine: SettlementEngine<L, O>,
        gateway: G,
        config: SweepConfig,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            gateway,
            config,
            gateway_timeout,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Sweeps the principal's own transactions.
    ///
    /// Gateway and per-row settle errors are counted, not returned; only a
    /// failure to list the candidates aborts the sweep.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn sweep(&self, principal: &Principal) -> Result<SweepReport> {
        let started = Instant::now();
        let query = UnresolvedQuery::for_student(principal.user_id)
            .provider(self.gateway.provider())
            .created_after(Utc::now() - self.config.lookback)
            .limit(self.config.limit);

        let candidates = self.engine.ledger().find_unresolved(&query).await?;

        let mut report = SweepReport::default();
        for transaction in candidates.iter().take(self.config.limit) {
            if !transaction.is_owned_by(principal.user_id) {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    "sweep candidate belongs to another user, skipping"
                );
                continue;
            }
            report.checked += 1;
            self.check(transaction, &mut report).await;
        }

        metrics::histogram!("sweep_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("sweep_transactions_checked_total").increment(report.checked as u64);
        tracing::info!(?report, "sweep finished");
        Ok(report)
    }

    async fn check(&self, transaction: &Transaction, report: &mut SweepReport) {
        let charge = match with_timeout(
            self.gateway_timeout,
            self.gateway.verify(&transaction.reference),
        )
        .await
        {
            Ok(charge) => charge,
            Err(e) => {
                tracing::warn!(reference = %transaction.reference, error = %e, "sweep verify failed");
                report.errors += 1;
                return;
            }
        };

        match self
            .engine
            .settle(&transaction.provider, &transaction.reference, &charge)
            .await
        {
            Ok(settlement) => report.record(&settlement.outcome),
            Err(e) => {
                tracing::error!(reference = %transaction.reference, error = %e, "sweep settle failed");
                report.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{Currency, Money, UserId};
    use domain::InMemoryOrderRepository;
    use ledger::{InMemoryLedger, NewTransaction, Provider, Reference};

    use super::*;
    use crate::gateway::{GatewayError, InMemoryGateway};

    fn naira(major: i64) -> Money {
        Money::from_major(major, Currency::ngn())
    }

    fn sweeper(
        ledger: &InMemoryLedger,
        gateway: &InMemoryGateway,
        limit: usize,
    ) -> Sweeper<InMemoryLedger, InMemoryOrderRepository, InMemoryGateway> {
        Sweeper::new(
            SettlementEngine::new(ledger.clone(), InMemoryOrderRepository::new()),
            gateway.clone(),
            SweepConfig {
                limit,
                ..Default::default()
            },
            Duration::from_secs(1),
        )
    }

    async fn unresolved(ledger: &InMemoryLedger, student: UserId, n: usize) -> Vec<Reference> {
        let mut references = Vec::new();
        for i in 0..n {
            let reference = Reference::parse(format!("LC_{student}_{i}")).unwrap();
            ledger
                .create(
                    NewTransaction::new(Provider::paystack(), reference.clone(), naira(5000))
                        .student(student),
                )
                .await
                .unwrap();
            references.push(reference);
        }
        references
    }

    #[tokio::test]
    async fn gateway_errors_are_counted_not_returned() {
        let ledger = InMemoryLedger::new();
        let gateway = InMemoryGateway::new();
        let student = Principal::student(UserId::new());
        unresolved(&ledger, student.user_id, 3).await;
        gateway.set_verify_error(Some(GatewayError::Transient("down".into())));

        let report = sweeper(&ledger, &gateway, 10).sweep(&student).await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.errors, 3);
        assert_eq!(report.settled, 0);
    }

    #[tokio::test]
    async fn respects_limit() {
        let ledger = InMemoryLedger::new();
        let gateway = InMemoryGateway::new();
        let student = Principal::student(UserId::new());
        unresolved(&ledger, student.user_id, 5).await;

        let report = sweeper(&ledger, &gateway, 2).sweep(&student).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.pending, 2);
        assert_eq!(gateway.verify_calls(), 2);
    }

    #[tokio::test]
    async fn settles_successful_charges() {
        let ledger = InMemoryLedger::new();
        let gateway = InMemoryGateway::new();
        let student = Principal::student(UserId::new());
        let references = unresolved(&ledger, student.user_id, 2).await;
        gateway.succeed(&references[0], &naira(5000));

        let report = sweeper(&ledger, &gateway, 10).sweep(&student).await.unwrap();
        assert_eq!(report.settled, 1);
        assert_eq!(report.pending, 1);
    }
}
