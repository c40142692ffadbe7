//! Settlement error types.

use domain::DomainError;
use ledger::{LedgerError, Reference, ReferenceError};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::signature::SignatureError;

/// Errors that can occur while checking out or settling payments.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The principal may not act on this transaction or session.
    #[error("Not authorized to {action}")]
    Unauthorized { action: &'static str },

    /// No transaction exists for the reference.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Reference),

    /// The session or request is not in a payable state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Bad input from the caller.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Checkout needs an email for the gateway receipt.
    #[error("An email address is required to check out")]
    MissingEmail,

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// Signed, but not a notification we can read.
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    /// The status endpoint could not be reached or read.
    #[error("Status unavailable: {0}")]
    StatusUnavailable(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("{0}")]
    Reference(#[from] ReferenceError),
}

impl SettlementError {
    pub(crate) fn unauthorized(action: &'static str) -> Self {
        SettlementError::Unauthorized { action }
    }
}

/// Convenience type alias for settlement results.
pub type Result<T> = std::result::Result<T, SettlementError>;
