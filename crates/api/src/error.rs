//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use ledger::LedgerError;
use settlement::SettlementError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// No usable caller identity on the request.
    Unauthenticated(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order lifecycle error.
    Domain(DomainError),
    /// Checkout, verification or reconciliation error.
    Settlement(SettlementError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => (domain_status(&err), err.to_string()),
            ApiError::Settlement(err) => (settlement_status(&err), err.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

pub(crate) fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        DomainError::Order(order_err) => match order_err {
            OrderError::InvalidTransition { .. }
            | OrderError::ProposalAlreadyAccepted { .. }
            | OrderError::SessionNotPaid { .. } => StatusCode::CONFLICT,
            OrderError::MissingField { .. }
            | OrderError::MissingQuote { .. }
            | OrderError::InvalidFee { .. }
            | OrderError::DurationTooShort { .. }
            | OrderError::NoTeachers => StatusCode::BAD_REQUEST,
        },
        DomainError::CorruptRow(_) | DomainError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn settlement_status(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        SettlementError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::InvalidState(_) => StatusCode::CONFLICT,
        SettlementError::Validation(_)
        | SettlementError::MissingEmail
        | SettlementError::MalformedNotification(_)
        | SettlementError::Reference(_) => StatusCode::BAD_REQUEST,
        SettlementError::Signature(_) => StatusCode::UNAUTHORIZED,
        SettlementError::Gateway(_) | SettlementError::StatusUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        SettlementError::Ledger(LedgerError::DuplicateReference(_)) => StatusCode::CONFLICT,
        SettlementError::Ledger(LedgerError::NotFound { .. }) => StatusCode::NOT_FOUND,
        SettlementError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SettlementError::Domain(err) => domain_status(err),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        ApiError::Settlement(err)
    }
}
