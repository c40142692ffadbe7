use thiserror::Error;

use crate::{Provider, Reference};

/// Errors that can occur when interacting with the transaction ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A transaction with this reference already exists.
    /// The caller must generate a fresh reference.
    #[error("Duplicate transaction reference: {0}")]
    DuplicateReference(Reference),

    /// No transaction exists for the provider/reference pair.
    #[error("Transaction not found: {provider}/{reference}")]
    NotFound {
        provider: Provider,
        reference: Reference,
    },

    /// A stored row could not be mapped back into a transaction.
    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
