use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::TransactionId;
use tokio::sync::RwLock;

use crate::{
    LedgerError, NewTransaction, Provider, Reference, Result, Transaction, TransactionStatus,
    UnresolvedQuery, store::TransactionLedger,
};

#[derive(Debug, Default)]
struct LedgerTables {
    transactions: HashMap<TransactionId, Transaction>,
    by_reference: HashMap<Reference, TransactionId>,
}

/// In-memory ledger for tests and local development.
///
/// Provides the same interface and the same conditional-transition
/// semantics as the PostgreSQL implementation: every transition is decided
/// under the write lock.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    tables: Arc<RwLock<LedgerTables>>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of transactions stored.
    pub async fn transaction_count(&self) -> usize {
        self.tables.read().await.transactions.len()
    }

    /// Returns a transaction by id.
    pub async fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.tables.read().await.transactions.get(&id).cloned()
    }

    async fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        raw: serde_json::Value,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(transaction) = tables.transactions.get_mut(&id) else {
            return Ok(false);
        };
        if transaction.status != TransactionStatus::Initialized {
            return Ok(false);
        }
        transaction.status = to;
        transaction.raw = Some(raw);
        transaction.resolved_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let mut tables = self.tables.write().await;

        if tables.by_reference.contains_key(&new.reference) {
            return Err(LedgerError::DuplicateReference(new.reference));
        }

        let transaction = new.into_transaction();
        tables
            .by_reference
            .insert(transaction.reference.clone(), transaction.id);
        tables
            .transactions
            .insert(transaction.id, transaction.clone());

        Ok(transaction)
    }

    async fn find_by_reference(
        &self,
        provider: &Provider,
        reference: &Reference,
    ) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_reference
            .get(reference)
            .and_then(|id| tables.transactions.get(id))
            .filter(|t| &t.provider == provider)
            .cloned())
    }

    async fn transition_to_success(
        &self,
        id: TransactionId,
        raw: serde_json::Value,
    ) -> Result<bool> {
        self.transition(id, TransactionStatus::Success, raw).await
    }

    async fn transition_to_failed(
        &self,
        id: TransactionId,
        raw: serde_json::Value,
    ) -> Result<bool> {
        self.transition(id, TransactionStatus::Failed, raw).await
    }

    async fn find_unresolved(&self, query: &UnresolvedQuery) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut transactions: Vec<_> = tables
            .transactions
            .values()
            .filter(|t| {
                if t.status != TransactionStatus::Initialized {
                    return false;
                }
                if let Some(student) = query.student_id
                    && t.links.student_id != Some(student)
                {
                    return false;
                }
                if let Some(ref provider) = query.provider
                    && &t.provider != provider
                {
                    return false;
                }
                query.covers(t.created_at)
            })
            .cloned()
            .collect();

        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = query.limit {
            transactions.truncate(limit);
        }

        Ok(transactions)
    }
}
