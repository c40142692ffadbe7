//! Polling status watcher for the post-checkout page.
//!
//! Reads status only; never calls the gateway and never writes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use common::{Principal, RequestId, SessionId};
use domain::OrderRepository;
use ledger::{Provider, Reference, TransactionLedger, TransactionStatus};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SettlementError};

/// Payment status as shown to the paying student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub found: bool,
    pub paid: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    pub session_id: Option<SessionId>,
    pub request_id: Option<RequestId>,
}

/// Where the watcher reads status from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, reference: &Reference) -> Result<StatusSnapshot>;
}

/// Reads the ledger and linked session for `principal`.
///
/// A transaction owned by someone else is `Unauthorized`; an unknown
/// reference is reported as not found.
pub async fn read_status<L, O>(
    ledger: &L,
    orders: &O,
    provider: &Provider,
    principal: &Principal,
    reference: &Reference,
) -> Result<StatusSnapshot>
where
    L: TransactionLedger,
    O: OrderRepository,
{
    let Some(transaction) = ledger.find_by_reference(provider, reference).await? else {
        return Ok(StatusSnapshot::default());
    };
    if !transaction.is_owned_by(principal.user_id) {
        return Err(SettlementError::unauthorized("view this payment"));
    }

    let session = match transaction.links.session_id {
        Some(id) => orders.get_session(id).await?,
        None => None,
    };
    let session_paid = session.as_ref().is_some_and(|s| s.payment_status.is_paid());

    Ok(StatusSnapshot {
        found: true,
        paid: transaction.is_success() || session_paid,
        failed: transaction.status == TransactionStatus::Failed,
        session_id: transaction.links.session_id,
        request_id: transaction
            .links
            .request_id
            .or(session.map(|s| s.request_id)),
    })
}

/// In-process [`StatusSource`] bound to one principal.
#[derive(Debug, Clone)]
pub struct LocalStatusSource<L, O> {
    ledger: L,
    orders: O,
    provider: Provider,
    principal: Principal,
}

impl<L, O> LocalStatusSource<L, O> {
    pub fn new(ledger: L, orders: O, provider: Provider, principal: Principal) -> Self {
        Self {
            ledger,
            orders,
            provider,
            principal,
        }
    }
}

#[async_trait]
impl<L, O> StatusSource for LocalStatusSource<L, O>
where
    L: TransactionLedger,
    O: OrderRepository,
{
    async fn status(&self, reference: &Reference) -> Result<StatusSnapshot> {
        read_status(
            &self.ledger,
            &self.orders,
            &self.provider,
            &self.principal,
            reference,
        )
        .await
    }
}

/// [`StatusSource`] polling `GET {base_url}/payments/status?ref=`.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
    principal: Principal,
}

impl HttpStatusSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, principal: Principal) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            principal,
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn status(&self, reference: &Reference) -> Result<StatusSnapshot> {
        let url = format!("{}/payments/status", self.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .get(&url)
            .query(&[("ref", reference.as_str())])
            .header("x-user-id", self.principal.user_id.to_string())
            .header("x-user-role", self.principal.role.as_str());
        if let Some(email) = &self.principal.email {
            request = request.header("x-user-email", email);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SettlementError::StatusUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SettlementError::StatusUnavailable(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<StatusSnapshot>()
            .await
            .map_err(|e| SettlementError::StatusUnavailable(e.to_string()))
    }
}

/// Poll interval and budget.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            max_attempts: 40,
        }
    }
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Paid(StatusSnapshot),
    Failed(StatusSnapshot),

    /// The attempt budget ran out with no final status.
    GaveUp { attempts: u32 },

    /// The caller cancelled after `attempts` polls.
    Cancelled { attempts: u32 },
}

/// Polls a [`StatusSource`] until the payment resolves or the budget runs
/// out.
#[derive(Debug, Clone)]
pub struct StatusWatcher<S> {
    source: S,
    config: WatchConfig,
}

impl<S: StatusSource> StatusWatcher<S> {
    pub fn new(source: S, config: WatchConfig) -> Self {
        Self { source, config }
    }

    pub async fn watch(&self, reference: &Reference) -> WatchOutcome {
        self.watch_until(reference, std::future::pending::<()>())
            .await
    }

    /// Like [`watch`](Self::watch), stopping as soon as `cancel` resolves.
    pub async fn watch_until<C>(&self, reference: &Reference, cancel: C) -> WatchOutcome
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        for attempt in 1..=self.config.max_attempts {
            tokio::select! {
                biased;
                _ = &mut cancel => return WatchOutcome::Cancelled { attempts: attempt - 1 },
                result = self.source.status(reference) => match result {
                    Ok(snapshot) if snapshot.paid => return WatchOutcome::Paid(snapshot),
                    Ok(snapshot) if snapshot.failed => return WatchOutcome::Failed(snapshot),
                    Ok(_) => {}
                    Err(e) => tracing::debug!(%reference, attempt, error = %e, "status poll failed"),
                },
            }

            if attempt < self.config.max_attempts {
                tokio::select! {
                    biased;
                    _ = &mut cancel => return WatchOutcome::Cancelled { attempts: attempt },
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
        }

        WatchOutcome::GaveUp {
            attempts: self.config.max_attempts,
        }
    }
}
