//! Shared types for the tutoring payments workspace.

pub mod money;
pub mod principal;
pub mod types;

pub use money::{Currency, CurrencyError, Money};
pub use principal::{Principal, Role};
pub use types::{ProposalId, RequestId, SessionId, TransactionId, UserId};
