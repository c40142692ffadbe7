//! Request, proposal and session state machines.

use serde::{Deserialize, Serialize};

/// The state of a student request in its lifecycle.
///
/// State transitions:
/// ```text
/// Open ──► Matched ──► AwaitingPayment ──► Paid ──► Scheduled ──► Completed
///  ▲          │  │                          ▲
///  └─decline──┘  └──────── settlement ──────┘
///
/// Open | Matched | AwaitingPayment ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for teachers to quote.
    #[default]
    Open,

    /// A proposal has been accepted and a teacher assigned.
    Matched,

    /// The student confirmed the match and is paying.
    AwaitingPayment,

    /// Payment settled.
    Paid,

    /// Session time agreed.
    Scheduled,

    /// Session concluded (terminal state).
    Completed,

    /// Withdrawn before payment (terminal state).
    Cancelled,
}

impl RequestStatus {
    /// Returns true if a proposal can be accepted in this state.
    pub fn can_accept_proposal(&self) -> bool {
        matches!(self, RequestStatus::Open)
    }

    /// Returns true if teachers can be invited or quote in this state.
    pub fn is_open(&self) -> bool {
        matches!(self, RequestStatus::Open)
    }

    /// Returns true if the student can confirm or decline the match.
    pub fn can_respond_to_match(&self) -> bool {
        matches!(self, RequestStatus::Matched)
    }

    /// Returns true if a settled payment may move the request to `Paid`.
    pub fn can_settle(&self) -> bool {
        matches!(self, RequestStatus::Matched | RequestStatus::AwaitingPayment)
    }

    /// Returns true if a payment checkout may be started in this state.
    pub fn can_checkout(&self) -> bool {
        self.can_settle()
    }

    /// Returns true once payment has been recorded against the request.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            RequestStatus::Paid | RequestStatus::Scheduled | RequestStatus::Completed
        )
    }

    /// Returns true if the session can be (re)scheduled in this state.
    pub fn can_schedule(&self) -> bool {
        matches!(self, RequestStatus::Paid | RequestStatus::Scheduled)
    }

    /// Returns true if the session can be marked complete in this state.
    pub fn can_complete(&self) -> bool {
        matches!(self, RequestStatus::Scheduled)
    }

    /// Returns true if the request can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            RequestStatus::Open | RequestStatus::Matched | RequestStatus::AwaitingPayment
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::Matched => "matched",
            RequestStatus::AwaitingPayment => "awaiting_payment",
            RequestStatus::Paid => "paid",
            RequestStatus::Scheduled => "scheduled",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "open" => RequestStatus::Open,
            "matched" => RequestStatus::Matched,
            "awaiting_payment" => RequestStatus::AwaitingPayment,
            "paid" => RequestStatus::Paid,
            "scheduled" => RequestStatus::Scheduled,
            "completed" => RequestStatus::Completed,
            "cancelled" => RequestStatus::Cancelled,
            _ => return None,
        })
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of a teacher's proposal for a request.
///
/// ```text
/// Invited ──► Submitted ──► Accepted
///    │            │
///    └────────────┴──► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Invited,
    Submitted,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    /// Returns true if the teacher can (re)submit a quote.
    pub fn can_quote(&self) -> bool {
        matches!(self, ProposalStatus::Invited | ProposalStatus::Submitted)
    }

    /// Returns true if the student can accept this proposal.
    pub fn can_accept(&self) -> bool {
        matches!(self, ProposalStatus::Submitted)
    }

    /// Returns true while the proposal competes for the request.
    pub fn is_pending(&self) -> bool {
        self.can_quote()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Invited => "invited",
            ProposalStatus::Submitted => "submitted",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "invited" => ProposalStatus::Invited,
            "submitted" => ProposalStatus::Submitted,
            "accepted" => ProposalStatus::Accepted,
            "rejected" => ProposalStatus::Rejected,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment state of a session. Only settlement moves it to `Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Paid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
