//! Domain error types.

use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The principal may not perform the action on this entity.
    #[error("Not authorized to {action}")]
    Unauthorized { action: &'static str },

    /// A lifecycle rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A stored row could not be mapped back into an entity.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(action: &'static str) -> Self {
        DomainError::Unauthorized { action }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
