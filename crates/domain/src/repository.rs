use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, ProposalId, RequestId, SessionId, UserId};
use serde::Serialize;

use crate::Result;
use crate::order::{CascadeWrite, Quote, Session, StudentRequest, TeacherProposal};

/// Everything that changed when a proposal was accepted.
#[derive(Debug, Clone, Serialize)]
pub struct Acceptance {
    pub request: StudentRequest,
    pub proposal: TeacherProposal,
    pub session: Session,
}

/// Persistence for requests, proposals and sessions.
///
/// Every mutating method is atomic: it re-reads the current row under a
/// guard, applies the entity's transition rule and writes back only if the
/// rule allowed it. Missing rows are `DomainError::NotFound`.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_request(&self, request: StudentRequest) -> Result<StudentRequest>;

    async fn get_request(&self, id: RequestId) -> Result<Option<StudentRequest>>;

    /// matched → awaiting_payment.
    async fn confirm_match(&self, id: RequestId) -> Result<StudentRequest>;

    /// matched → open; clears the teacher and rejects the accepted proposal.
    async fn decline_match(&self, id: RequestId) -> Result<StudentRequest>;

    async fn cancel_request(&self, id: RequestId) -> Result<StudentRequest>;

    /// Creates `invited` proposals, skipping teachers already invited.
    /// Returns only the proposals created by this call.
    async fn invite_teachers(
        &self,
        request_id: RequestId,
        teacher_ids: &[UserId],
    ) -> Result<Vec<TeacherProposal>>;

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<TeacherProposal>>;

    async fn proposals_for_request(&self, request_id: RequestId) -> Result<Vec<TeacherProposal>>;

    async fn submit_quote(
        &self,
        id: ProposalId,
        quote: Quote,
        note: Option<String>,
    ) -> Result<TeacherProposal>;

    /// Accepts a proposal, rejects its siblings, matches the request and
    /// upserts the session by request id, all in one atomic step.
    async fn accept_proposal(&self, id: ProposalId) -> Result<Acceptance>;

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>>;

    async fn session_for_request(&self, request_id: RequestId) -> Result<Option<Session>>;

    /// Settlement cascade write for the session. Never errors on a missing
    /// row; that is reported as `Skipped`.
    async fn mark_session_paid(&self, id: SessionId, amount: &Money) -> Result<CascadeWrite>;

    /// Settlement cascade write for the request.
    async fn mark_request_paid(&self, id: RequestId) -> Result<CascadeWrite>;

    /// Sets the session time and moves the request to scheduled.
    async fn schedule_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<Session>;

    /// scheduled → completed for the session's request.
    async fn complete_session(&self, id: SessionId) -> Result<StudentRequest>;
}
