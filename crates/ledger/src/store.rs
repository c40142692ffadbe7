use async_trait::async_trait;
use common::TransactionId;

use crate::{
    LedgerError, NewTransaction, Provider, Reference, Result, Transaction, UnresolvedQuery,
};

/// Durable store of payment attempts.
///
/// Rows are only ever inserted or moved out of `initialized`; nothing is
/// deleted. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Records a new `initialized` transaction.
    ///
    /// Fails with `DuplicateReference` if the reference is already taken.
    async fn create(&self, transaction: NewTransaction) -> Result<Transaction>;

    /// Looks up a transaction by gateway and reference.
    async fn find_by_reference(
        &self,
        provider: &Provider,
        reference: &Reference,
    ) -> Result<Option<Transaction>>;

    /// Moves an `initialized` transaction to `success`, storing the verified
    /// payload.
    ///
    /// Returns true only if this call performed the transition. A false
    /// result means the transaction was already resolved by someone else.
    async fn transition_to_success(
        &self,
        id: TransactionId,
        raw: serde_json::Value,
    ) -> Result<bool>;

    /// Moves an `initialized` transaction to `failed`. Same contract as
    /// [`transition_to_success`](Self::transition_to_success).
    async fn transition_to_failed(&self, id: TransactionId, raw: serde_json::Value)
    -> Result<bool>;

    /// Lists `initialized` transactions matching the query, newest first.
    async fn find_unresolved(&self, query: &UnresolvedQuery) -> Result<Vec<Transaction>>;
}

/// Extension trait providing convenience methods for ledgers.
#[async_trait]
pub trait TransactionLedgerExt: TransactionLedger {
    /// Like `find_by_reference`, but a missing row is a `NotFound` error.
    async fn get_by_reference(
        &self,
        provider: &Provider,
        reference: &Reference,
    ) -> Result<Transaction> {
        self.find_by_reference(provider, reference)
            .await?
            .ok_or_else(|| LedgerError::NotFound {
                provider: provider.clone(),
                reference: reference.clone(),
            })
    }

    /// Checks whether a reference is already in use.
    async fn reference_exists(&self, provider: &Provider, reference: &Reference) -> Result<bool> {
        Ok(self.find_by_reference(provider, reference).await?.is_some())
    }
}

// Blanket implementation for all TransactionLedger implementations
impl<T: TransactionLedger + ?Sized> TransactionLedgerExt for T {}
