//! Request, proposal and session lifecycle.

mod commands;
mod model;
mod service;
mod state;

pub use commands::*;
pub use model::{CascadeWrite, MIN_SESSION_MINUTES, Quote, Session, StudentRequest, TeacherProposal};
pub use service::OrderService;
pub use state::{PaymentStatus, ProposalStatus, RequestStatus};

use common::{Money, ProposalId, RequestId, SessionId};
use thiserror::Error;

/// Business-rule violations in the order lifecycle.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A required text field was blank.
    #[error("{field} is required")]
    MissingField { field: &'static str },

    /// The entity is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} {entity} in {current} state")]
    InvalidTransition {
        entity: &'static str,
        current: &'static str,
        action: &'static str,
    },

    /// Another proposal for the request has already been accepted.
    #[error("Request {request_id} already has an accepted proposal")]
    ProposalAlreadyAccepted { request_id: RequestId },

    #[error("Proposal {proposal_id} has no quote")]
    MissingQuote { proposal_id: ProposalId },

    #[error("Invalid fee: {fee} (must be greater than 0)")]
    InvalidFee { fee: Money },

    #[error("Session too short: {minutes} minutes (minimum {minimum})")]
    DurationTooShort { minutes: u32, minimum: u32 },

    #[error("No teachers to invite")]
    NoTeachers,

    #[error("Session {session_id} has not been paid")]
    SessionNotPaid { session_id: SessionId },
}
