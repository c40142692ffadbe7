//! Order service applying ownership checks on top of the repository.

use common::{Principal, ProposalId, RequestId, Role, SessionId, UserId};

use crate::error::{DomainError, Result};
use crate::repository::{Acceptance, OrderRepository};

use super::{
    InviteTeachers, OpenRequest, OrderError, Quote, ScheduleSession, Session, StudentRequest,
    SubmitQuote, TeacherProposal,
};

fn record_transition(transition: &'static str) {
    metrics::counter!("order_transitions_total", "transition" => transition).increment(1);
}

/// Service for the request/proposal/session lifecycle.
///
/// Every method takes the calling [`Principal`] and refuses to read or
/// mutate resources the principal does not own. Payment state is not
/// touched here; only settlement marks sessions and requests paid.
pub struct OrderService<R: OrderRepository> {
    repo: R,
}

impl<R: OrderRepository> OrderService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    async fn load_request(&self, id: RequestId) -> Result<StudentRequest> {
        self.repo
            .get_request(id)
            .await?
            .ok_or_else(|| DomainError::not_found("request", id))
    }

    async fn load_proposal(&self, id: ProposalId) -> Result<TeacherProposal> {
        self.repo
            .get_proposal(id)
            .await?
            .ok_or_else(|| DomainError::not_found("proposal", id))
    }

    async fn load_session(&self, id: SessionId) -> Result<Session> {
        self.repo
            .get_session(id)
            .await?
            .ok_or_else(|| DomainError::not_found("session", id))
    }

    /// Loads a request the principal owns as its student (or any, for admins).
    async fn owned_request(
        &self,
        principal: &Principal,
        id: RequestId,
        action: &'static str,
    ) -> Result<StudentRequest> {
        let request = self.load_request(id).await?;
        if !principal.owns_or_admin(request.student_id) {
            return Err(DomainError::unauthorized(action));
        }
        Ok(request)
    }

    /// Opens a new request for the calling student.
    #[tracing::instrument(skip(self, cmd), fields(request_id = %cmd.request_id))]
    pub async fn open_request(
        &self,
        principal: &Principal,
        cmd: OpenRequest,
    ) -> Result<StudentRequest> {
        if principal.role != Role::Student {
            return Err(DomainError::unauthorized("open a request"));
        }
        let request = StudentRequest::open(
            cmd.request_id,
            principal.user_id,
            cmd.category,
            cmd.subject,
            cmd.topic,
        )?;
        let request = self.repo.insert_request(request).await?;
        record_transition("request_opened");
        Ok(request)
    }

    /// Loads a request visible to the principal: its student, a teacher
    /// invited to it, or an admin.
    #[tracing::instrument(skip(self))]
    pub async fn get_request(&self, principal: &Principal, id: RequestId) -> Result<StudentRequest> {
        let request = self.load_request(id).await?;
        if principal.owns_or_admin(request.student_id)
            || request.matched_teacher_id == Some(principal.user_id)
            || self.is_invited(principal.user_id, id).await?
        {
            return Ok(request);
        }
        Err(DomainError::unauthorized("view this request"))
    }

    async fn is_invited(&self, teacher_id: UserId, request_id: RequestId) -> Result<bool> {
        Ok(self
            .repo
            .proposals_for_request(request_id)
            .await?
            .iter()
            .any(|p| p.teacher_id == teacher_id))
    }

    /// Invites teachers to quote. Admin only; duplicates are skipped.
    #[tracing::instrument(skip(self, cmd), fields(request_id = %cmd.request_id))]
    pub async fn invite_teachers(
        &self,
        principal: &Principal,
        cmd: InviteTeachers,
    ) -> Result<Vec<TeacherProposal>> {
        if !principal.is_admin() {
            return Err(DomainError::unauthorized("invite teachers"));
        }
        if cmd.teacher_ids.is_empty() {
            return Err(OrderError::NoTeachers.into());
        }
        let created = self
            .repo
            .invite_teachers(cmd.request_id, &cmd.teacher_ids)
            .await?;
        tracing::info!(invited = created.len(), "teachers invited");
        Ok(created)
    }

    /// Lists proposals for a request. Teachers only see their own.
    #[tracing::instrument(skip(self))]
    pub async fn proposals(
        &self,
        principal: &Principal,
        request_id: RequestId,
    ) -> Result<Vec<TeacherProposal>> {
        let request = self.load_request(request_id).await?;
        let proposals = self.repo.proposals_for_request(request_id).await?;

        if principal.owns_or_admin(request.student_id) {
            return Ok(proposals);
        }
        if principal.role == Role::Teacher {
            return Ok(proposals
                .into_iter()
                .filter(|p| p.teacher_id == principal.user_id)
                .collect());
        }
        Err(DomainError::unauthorized("view proposals"))
    }

    /// Submits or revises the invited teacher's quote.
    #[tracing::instrument(skip(self, cmd), fields(proposal_id = %cmd.proposal_id))]
    pub async fn submit_quote(
        &self,
        principal: &Principal,
        cmd: SubmitQuote,
    ) -> Result<TeacherProposal> {
        let proposal = self.load_proposal(cmd.proposal_id).await?;
        if proposal.teacher_id != principal.user_id {
            return Err(DomainError::unauthorized("quote on this proposal"));
        }
        let quote = Quote::new(cmd.fee, cmd.duration_minutes)?;
        let proposal = self
            .repo
            .submit_quote(cmd.proposal_id, quote, cmd.note)
            .await?;
        record_transition("proposal_submitted");
        Ok(proposal)
    }

    /// Accepts a proposal for the principal's request.
    #[tracing::instrument(skip(self))]
    pub async fn accept_proposal(
        &self,
        principal: &Principal,
        proposal_id: ProposalId,
    ) -> Result<Acceptance> {
        let proposal = self.load_proposal(proposal_id).await?;
        self.owned_request(principal, proposal.request_id, "accept this proposal")
            .await?;

        let acceptance = self.repo.accept_proposal(proposal_id).await?;
        record_transition("proposal_accepted");
        tracing::info!(
            request_id = %acceptance.request.id,
            session_id = %acceptance.session.id,
            price = %acceptance.session.price,
            "proposal accepted"
        );
        Ok(acceptance)
    }

    /// The student confirms the match and proceeds to payment.
    #[tracing::instrument(skip(self))]
    pub async fn accept_match(
        &self,
        principal: &Principal,
        request_id: RequestId,
    ) -> Result<StudentRequest> {
        let request = self.load_request(request_id).await?;
        if !request.is_owned_by(principal.user_id) {
            return Err(DomainError::unauthorized("accept this match"));
        }
        let request = self.repo.confirm_match(request_id).await?;
        record_transition("match_accepted");
        Ok(request)
    }

    /// The student declines the match; the request reopens.
    #[tracing::instrument(skip(self))]
    pub async fn decline_match(
        &self,
        principal: &Principal,
        request_id: RequestId,
    ) -> Result<StudentRequest> {
        let request = self.load_request(request_id).await?;
        if !request.is_owned_by(principal.user_id) {
            return Err(DomainError::unauthorized("decline this match"));
        }
        let request = self.repo.decline_match(request_id).await?;
        record_transition("match_declined");
        Ok(request)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_request(
        &self,
        principal: &Principal,
        request_id: RequestId,
    ) -> Result<StudentRequest> {
        self.owned_request(principal, request_id, "cancel this request")
            .await?;
        let request = self.repo.cancel_request(request_id).await?;
        record_transition("request_cancelled");
        Ok(request)
    }

    /// Loads a session visible to its student, its teacher or an admin.
    #[tracing::instrument(skip(self))]
    pub async fn get_session(&self, principal: &Principal, id: SessionId) -> Result<Session> {
        let session = self.load_session(id).await?;
        if session.involves(principal.user_id) || principal.is_admin() {
            return Ok(session);
        }
        Err(DomainError::unauthorized("view this session"))
    }

    /// Loads a session the principal is paying for.
    pub async fn session_for_payment(
        &self,
        principal: &Principal,
        id: SessionId,
    ) -> Result<(Session, StudentRequest)> {
        let session = self.load_session(id).await?;
        if session.student_id != principal.user_id {
            return Err(DomainError::unauthorized("pay for this session"));
        }
        let request = self.load_request(session.request_id).await?;
        Ok((session, request))
    }

    /// Sets the time of a paid session. Assigned teacher or admin.
    #[tracing::instrument(skip(self, cmd), fields(session_id = %cmd.session_id))]
    pub async fn schedule_session(
        &self,
        principal: &Principal,
        cmd: ScheduleSession,
    ) -> Result<Session> {
        let session = self.load_session(cmd.session_id).await?;
        if !principal.owns_or_admin(session.teacher_id) {
            return Err(DomainError::unauthorized("schedule this session"));
        }
        let session = self
            .repo
            .schedule_session(cmd.session_id, cmd.scheduled_at)
            .await?;
        record_transition("session_scheduled");
        Ok(session)
    }

    /// Marks the session's request completed. Assigned teacher or admin.
    #[tracing::instrument(skip(self))]
    pub async fn complete_session(
        &self,
        principal: &Principal,
        id: SessionId,
    ) -> Result<StudentRequest> {
        let session = self.load_session(id).await?;
        if !principal.owns_or_admin(session.teacher_id) {
            return Err(DomainError::unauthorized("complete this session"));
        }
        let request = self.repo.complete_session(id).await?;
        record_transition("session_completed");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use common::{Currency, Money};

    use super::*;
    use crate::memory::InMemoryOrderRepository;
    use crate::order::{ProposalStatus, RequestStatus};

    fn service() -> OrderService<InMemoryOrderRepository> {
        OrderService::new(InMemoryOrderRepository::new())
    }

    fn naira(major: i64) -> Money {
        Money::from_major(major, Currency::ngn())
    }

    #[tokio::test]
    async fn test_only_students_open_requests() {
        let service = service();
        let teacher = Principal::teacher(UserId::new());

        let err = service
            .open_request(&teacher, OpenRequest::new("Maths", "Algebra"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_invite_requires_admin() {
        let service = service();
        let student = Principal::student(UserId::new());
        let request = service
            .open_request(&student, OpenRequest::new("Maths", "Algebra"))
            .await
            .unwrap();

        let err = service
            .invite_teachers(&student, InviteTeachers::new(request.id, [UserId::new()]))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized { .. }));

        let admin = Principal::admin(UserId::new());
        let err = service
            .invite_teachers(&admin, InviteTeachers::new(request.id, Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Order(OrderError::NoTeachers)));
    }

    #[tokio::test]
    async fn test_quote_only_by_invited_teacher() {
        let service = service();
        let student = Principal::student(UserId::new());
        let admin = Principal::admin(UserId::new());
        let teacher = Principal::teacher(UserId::new());

        let request = service
            .open_request(&student, OpenRequest::new("Maths", "Algebra"))
            .await
            .unwrap();
        let invited = service
            .invite_teachers(&admin, InviteTeachers::new(request.id, [teacher.user_id]))
            .await
            .unwrap();

        let intruder = Principal::teacher(UserId::new());
        let err = service
            .submit_quote(&intruder, SubmitQuote::new(invited[0].id, naira(5000), 60))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized { .. }));

        let proposal = service
            .submit_quote(&teacher, SubmitQuote::new(invited[0].id, naira(5000), 60))
            .await
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Submitted);

        let err = service
            .submit_quote(&teacher, SubmitQuote::new(invited[0].id, naira(5000), 5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::DurationTooShort { .. })
        ));
    }

    #[tokio::test]
    async fn test_other_student_cannot_accept_or_view() {
        let service = service();
        let owner = Principal::student(UserId::new());
        let other = Principal::student(UserId::new());
        let admin = Principal::admin(UserId::new());
        let teacher = Principal::teacher(UserId::new());

        let request = service
            .open_request(&owner, OpenRequest::new("Maths", "Algebra"))
            .await
            .unwrap();
        let invited = service
            .invite_teachers(&admin, InviteTeachers::new(request.id, [teacher.user_id]))
            .await
            .unwrap();
        service
            .submit_quote(&teacher, SubmitQuote::new(invited[0].id, naira(5000), 60))
            .await
            .unwrap();

        assert!(matches!(
            service.get_request(&other, request.id).await,
            Err(DomainError::Unauthorized { .. })
        ));
        assert!(service.get_request(&teacher, request.id).await.is_ok());
        assert!(matches!(
            service.accept_proposal(&other, invited[0].id).await,
            Err(DomainError::Unauthorized { .. })
        ));

        let acceptance = service
            .accept_proposal(&owner, invited[0].id)
            .await
            .unwrap();
        assert_eq!(acceptance.request.status, RequestStatus::Matched);

        assert!(matches!(
            service.accept_match(&other, request.id).await,
            Err(DomainError::Unauthorized { .. })
        ));
        assert!(matches!(
            service.get_session(&other, acceptance.session.id).await,
            Err(DomainError::Unauthorized { .. })
        ));
        assert!(
            service
                .get_session(&teacher, acceptance.session.id)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_missing_request_is_not_found() {
        let service = service();
        let student = Principal::student(UserId::new());
        let err = service
            .get_request(&student, RequestId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "request", .. }));
    }
}
