//! Request, proposal and session entities.
//!
//! Each entity owns its transition rules. Repositories call these methods
//! while holding whatever guard makes the write atomic, and bump `version`
//! only when something actually changed.

use chrono::{DateTime, Utc};
use common::{Money, ProposalId, RequestId, SessionId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, PaymentStatus, ProposalStatus, RequestStatus};

/// Shortest bookable session.
pub const MIN_SESSION_MINUTES: u32 = 15;

/// Result of an idempotent cascade write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeWrite {
    /// This call changed the row.
    Applied,
    /// The row was already in the target state.
    Unchanged,
    /// The row exists but is not eligible, or is missing.
    Skipped(String),
}

impl CascadeWrite {
    pub fn is_applied(&self) -> bool {
        matches!(self, CascadeWrite::Applied)
    }
}

/// A student's request for tutoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRequest {
    pub id: RequestId,
    pub student_id: UserId,
    pub category: String,
    pub subject: String,
    pub topic: Option<String>,
    pub status: RequestStatus,
    pub matched_teacher_id: Option<UserId>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentRequest {
    /// Opens a new request. Category and subject are required.
    pub fn open(
        id: RequestId,
        student_id: UserId,
        category: impl Into<String>,
        subject: impl Into<String>,
        topic: Option<String>,
    ) -> Result<Self, OrderError> {
        let category = category.into().trim().to_string();
        let subject = subject.into().trim().to_string();
        if category.is_empty() {
            return Err(OrderError::MissingField { field: "category" });
        }
        if subject.is_empty() {
            return Err(OrderError::MissingField { field: "subject" });
        }

        let now = Utc::now();
        Ok(Self {
            id,
            student_id,
            category,
            subject,
            topic: topic.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            status: RequestStatus::Open,
            matched_teacher_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.student_id == user
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidTransition {
            entity: "request",
            current: self.status.as_str(),
            action,
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// open → matched, assigning the teacher.
    pub fn assign_teacher(&mut self, teacher_id: UserId) -> Result<(), OrderError> {
        if !self.status.can_accept_proposal() {
            return Err(self.invalid("accept a proposal for"));
        }
        self.status = RequestStatus::Matched;
        self.matched_teacher_id = Some(teacher_id);
        self.touch();
        Ok(())
    }

    /// matched → awaiting_payment.
    pub fn confirm_match(&mut self) -> Result<(), OrderError> {
        if !self.status.can_respond_to_match() {
            return Err(self.invalid("accept the match of"));
        }
        self.status = RequestStatus::AwaitingPayment;
        self.touch();
        Ok(())
    }

    /// matched → open, clearing the teacher.
    pub fn decline_match(&mut self) -> Result<(), OrderError> {
        if !self.status.can_respond_to_match() {
            return Err(self.invalid("decline the match of"));
        }
        self.status = RequestStatus::Open;
        self.matched_teacher_id = None;
        self.touch();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        self.status = RequestStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Settlement cascade: matched | awaiting_payment → paid.
    pub fn mark_paid(&mut self) -> CascadeWrite {
        if self.status.is_settled() {
            return CascadeWrite::Unchanged;
        }
        if !self.status.can_settle() {
            return CascadeWrite::Skipped(format!("request is {}", self.status));
        }
        self.status = RequestStatus::Paid;
        self.touch();
        CascadeWrite::Applied
    }

    /// paid → scheduled. Rescheduling an already scheduled request keeps it
    /// scheduled without a status change.
    pub fn mark_scheduled(&mut self) -> Result<(), OrderError> {
        if !self.status.can_schedule() {
            return Err(self.invalid("schedule"));
        }
        if self.status != RequestStatus::Scheduled {
            self.status = RequestStatus::Scheduled;
            self.touch();
        }
        Ok(())
    }

    /// scheduled → completed.
    pub fn complete(&mut self) -> Result<(), OrderError> {
        if !self.status.can_complete() {
            return Err(self.invalid("complete"));
        }
        self.status = RequestStatus::Completed;
        self.touch();
        Ok(())
    }
}

/// A teacher's price and duration for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub fee: Money,
    pub duration_minutes: u32,
}

impl Quote {
    /// Validates fee > 0 and duration of at least [`MIN_SESSION_MINUTES`].
    pub fn new(fee: Money, duration_minutes: u32) -> Result<Self, OrderError> {
        if !fee.is_positive() {
            return Err(OrderError::InvalidFee { fee });
        }
        if duration_minutes < MIN_SESSION_MINUTES {
            return Err(OrderError::DurationTooShort {
                minutes: duration_minutes,
                minimum: MIN_SESSION_MINUTES,
            });
        }
        Ok(Self {
            fee,
            duration_minutes,
        })
    }
}

/// A teacher's invitation to, and quote for, a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherProposal {
    pub id: ProposalId,
    pub request_id: RequestId,
    pub teacher_id: UserId,
    pub status: ProposalStatus,
    pub quote: Option<Quote>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeacherProposal {
    pub fn invite(request_id: RequestId, teacher_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ProposalId::new(),
            request_id,
            teacher_id,
            status: ProposalStatus::Invited,
            quote: None,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidTransition {
            entity: "proposal",
            current: self.status.as_str(),
            action,
        }
    }

    /// invited | submitted → submitted.
    pub fn submit_quote(&mut self, quote: Quote, note: Option<String>) -> Result<(), OrderError> {
        if !self.status.can_quote() {
            return Err(self.invalid("quote"));
        }
        self.status = ProposalStatus::Submitted;
        self.quote = Some(quote);
        self.note = note;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// submitted → accepted. Returns the quote that gets locked into the session.
    pub fn accept(&mut self) -> Result<Quote, OrderError> {
        if !self.status.can_accept() {
            return Err(self.invalid("accept"));
        }
        let quote = self.quote.clone().ok_or(OrderError::MissingQuote {
            proposal_id: self.id,
        })?;
        self.status = ProposalStatus::Accepted;
        self.updated_at = Utc::now();
        Ok(quote)
    }

    /// Rejects the proposal if it is still competing or was the accepted one.
    pub fn reject(&mut self) {
        if self.status != ProposalStatus::Rejected {
            self.status = ProposalStatus::Rejected;
            self.updated_at = Utc::now();
        }
    }
}

/// The booked lesson for a matched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub request_id: RequestId,
    pub student_id: UserId,
    pub teacher_id: UserId,

    /// Price locked when the proposal was accepted. Never recomputed.
    pub price: Money,
    pub duration_minutes: u32,
    pub payment_status: PaymentStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates a pending session locking the accepted quote.
    pub fn lock(request: &StudentRequest, teacher_id: UserId, quote: &Quote) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            request_id: request.id,
            student_id: request.student_id,
            teacher_id,
            price: quote.fee.clone(),
            duration_minutes: quote.duration_minutes,
            payment_status: PaymentStatus::Pending,
            scheduled_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-locks an existing pending session after a re-match.
    pub fn relock(&mut self, teacher_id: UserId, quote: &Quote) -> Result<(), OrderError> {
        if self.payment_status.is_paid() {
            return Err(OrderError::InvalidTransition {
                entity: "session",
                current: self.payment_status.as_str(),
                action: "re-price",
            });
        }
        self.teacher_id = teacher_id;
        self.price = quote.fee.clone();
        self.duration_minutes = quote.duration_minutes;
        self.touch();
        Ok(())
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.student_id == user || self.teacher_id == user
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Settlement cascade: pending → paid, only for the exact locked price.
    pub fn mark_paid(&mut self, amount: &Money) -> CascadeWrite {
        if self.payment_status.is_paid() {
            return CascadeWrite::Unchanged;
        }
        if &self.price != amount {
            return CascadeWrite::Skipped(format!(
                "locked price {} differs from paid amount {amount}",
                self.price
            ));
        }
        self.payment_status = PaymentStatus::Paid;
        self.touch();
        CascadeWrite::Applied
    }

    pub fn schedule(&mut self, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.payment_status.is_paid() {
            return Err(OrderError::SessionNotPaid {
                session_id: self.id,
            });
        }
        if self.scheduled_at != Some(at) {
            self.scheduled_at = Some(at);
            self.touch();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::Currency;

    use super::*;

    fn naira(major: i64) -> Money {
        Money::from_major(major, Currency::ngn())
    }

    fn open_request() -> StudentRequest {
        StudentRequest::open(RequestId::new(), UserId::new(), "Maths", "Algebra", None).unwrap()
    }

    #[test]
    fn open_requires_category_and_subject() {
        let err = StudentRequest::open(RequestId::new(), UserId::new(), " ", "Algebra", None);
        assert!(matches!(
            err,
            Err(OrderError::MissingField { field: "category" })
        ));

        let err = StudentRequest::open(RequestId::new(), UserId::new(), "Maths", "", None);
        assert!(matches!(
            err,
            Err(OrderError::MissingField { field: "subject" })
        ));
    }

    #[test]
    fn decline_returns_to_open_and_clears_teacher() {
        let mut request = open_request();
        request.assign_teacher(UserId::new()).unwrap();
        assert_eq!(request.status, RequestStatus::Matched);

        request.decline_match().unwrap();
        assert_eq!(request.status, RequestStatus::Open);
        assert!(request.matched_teacher_id.is_none());
        assert_eq!(request.version, 3);
    }

    #[test]
    fn confirm_match_only_from_matched() {
        let mut request = open_request();
        let err = request.confirm_match().unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                current: "open",
                ..
            }
        ));
    }

    #[test]
    fn mark_paid_is_idempotent() {
        let mut request = open_request();
        request.assign_teacher(UserId::new()).unwrap();
        request.confirm_match().unwrap();

        assert_eq!(request.mark_paid(), CascadeWrite::Applied);
        let version = request.version;
        assert_eq!(request.mark_paid(), CascadeWrite::Unchanged);
        assert_eq!(request.version, version);
    }

    #[test]
    fn mark_paid_skips_open_and_cancelled() {
        let mut request = open_request();
        assert!(matches!(request.mark_paid(), CascadeWrite::Skipped(_)));
        request.cancel().unwrap();
        assert!(matches!(request.mark_paid(), CascadeWrite::Skipped(_)));
        assert_eq!(request.status, RequestStatus::Cancelled);
    }

    #[test]
    fn quote_rules() {
        assert!(Quote::new(naira(5000), 60).is_ok());
        assert!(matches!(
            Quote::new(naira(0), 60),
            Err(OrderError::InvalidFee { .. })
        ));
        assert!(matches!(
            Quote::new(naira(5000), 10),
            Err(OrderError::DurationTooShort { minimum: 15, .. })
        ));
    }

    #[test]
    fn proposal_accept_requires_submitted_quote() {
        let mut proposal = TeacherProposal::invite(RequestId::new(), UserId::new());
        assert!(proposal.accept().is_err());

        proposal
            .submit_quote(Quote::new(naira(5000), 60).unwrap(), None)
            .unwrap();
        let quote = proposal.accept().unwrap();
        assert_eq!(quote.fee, naira(5000));
        assert_eq!(proposal.status, ProposalStatus::Accepted);

        assert!(proposal.submit_quote(quote, None).is_err());
    }

    #[test]
    fn session_paid_only_for_locked_price() {
        let request = open_request();
        let quote = Quote::new(naira(5000), 60).unwrap();
        let mut session = Session::lock(&request, UserId::new(), &quote);

        assert!(matches!(
            session.mark_paid(&naira(4000)),
            CascadeWrite::Skipped(_)
        ));
        assert!(matches!(
            session.mark_paid(&Money::from_major(5000, Currency::new("USD").unwrap())),
            CascadeWrite::Skipped(_)
        ));
        assert_eq!(session.payment_status, PaymentStatus::Pending);

        assert_eq!(session.mark_paid(&naira(5000)), CascadeWrite::Applied);
        assert_eq!(session.mark_paid(&naira(5000)), CascadeWrite::Unchanged);
        assert_eq!(session.version, 2);
    }

    #[test]
    fn paid_session_cannot_be_repriced() {
        let request = open_request();
        let quote = Quote::new(naira(5000), 60).unwrap();
        let mut session = Session::lock(&request, UserId::new(), &quote);
        session.mark_paid(&naira(5000));

        assert!(session.relock(UserId::new(), &quote).is_err());
    }

    #[test]
    fn schedule_requires_payment() {
        let request = open_request();
        let quote = Quote::new(naira(5000), 60).unwrap();
        let mut session = Session::lock(&request, UserId::new(), &quote);

        assert!(matches!(
            session.schedule(Utc::now()),
            Err(OrderError::SessionNotPaid { .. })
        ));
        session.mark_paid(&naira(5000));
        assert!(session.schedule(Utc::now()).is_ok());
    }
}
