use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, ProposalId, RequestId, SessionId, UserId};
use tokio::sync::RwLock;

use crate::order::{
    CascadeWrite, OrderError, ProposalStatus, Quote, Session, StudentRequest, TeacherProposal,
};
use crate::repository::{Acceptance, OrderRepository};
use crate::{DomainError, Result};

#[derive(Debug, Default)]
struct OrderTables {
    requests: HashMap<RequestId, StudentRequest>,
    proposals: HashMap<ProposalId, TeacherProposal>,
    sessions: HashMap<SessionId, Session>,
    session_by_request: HashMap<RequestId, SessionId>,
}

impl OrderTables {
    fn request_mut(&mut self, id: RequestId) -> Result<&mut StudentRequest> {
        self.requests
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("request", id))
    }

    fn session(&self, id: SessionId) -> Result<&Session> {
        self.sessions
            .get(&id)
            .ok_or_else(|| DomainError::not_found("session", id))
    }
}

/// In-memory order repository for tests and local development.
///
/// One write lock covers all three tables, so multi-entity operations such
/// as accepting a proposal are atomic.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    tables: Arc<RwLock<OrderTables>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session directly, bypassing proposal acceptance.
    pub async fn seed_session(&self, session: Session) {
        let mut tables = self.tables.write().await;
        tables.session_by_request.insert(session.request_id, session.id);
        tables.sessions.insert(session.id, session);
    }

    /// Replaces a stored request as-is.
    pub async fn seed_request(&self, request: StudentRequest) {
        self.tables.write().await.requests.insert(request.id, request);
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert_request(&self, request: StudentRequest) -> Result<StudentRequest> {
        let mut tables = self.tables.write().await;
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<StudentRequest>> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn confirm_match(&self, id: RequestId) -> Result<StudentRequest> {
        let mut tables = self.tables.write().await;
        let request = tables.request_mut(id)?;
        request.confirm_match()?;
        Ok(request.clone())
    }

    async fn decline_match(&self, id: RequestId) -> Result<StudentRequest> {
        let mut tables = self.tables.write().await;
        let request = tables.request_mut(id)?;
        request.decline_match()?;
        let request = request.clone();

        for proposal in tables.proposals.values_mut() {
            if proposal.request_id == id && proposal.status == ProposalStatus::Accepted {
                proposal.reject();
            }
        }
        Ok(request)
    }

    async fn cancel_request(&self, id: RequestId) -> Result<StudentRequest> {
        let mut tables = self.tables.write().await;
        let request = tables.request_mut(id)?;
        request.cancel()?;
        Ok(request.clone())
    }

    async fn invite_teachers(
        &self,
        request_id: RequestId,
        teacher_ids: &[UserId],
    ) -> Result<Vec<TeacherProposal>> {
        let mut tables = self.tables.write().await;
        let request = tables.request_mut(request_id)?;
        if !request.status.is_open() {
            return Err(OrderError::InvalidTransition {
                entity: "request",
                current: request.status.as_str(),
                action: "invite teachers to",
            }
            .into());
        }

        let mut created = Vec::new();
        for &teacher_id in teacher_ids {
            let already_invited = tables
                .proposals
                .values()
                .any(|p| p.request_id == request_id && p.teacher_id == teacher_id);
            if already_invited {
                continue;
            }
            let proposal = TeacherProposal::invite(request_id, teacher_id);
            tables.proposals.insert(proposal.id, proposal.clone());
            created.push(proposal);
        }
        Ok(created)
    }

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<TeacherProposal>> {
        Ok(self.tables.read().await.proposals.get(&id).cloned())
    }

    async fn proposals_for_request(&self, request_id: RequestId) -> Result<Vec<TeacherProposal>> {
        let tables = self.tables.read().await;
        let mut proposals: Vec<_> = tables
            .proposals
            .values()
            .filter(|p| p.request_id == request_id)
            .cloned()
            .collect();
        proposals.sort_by_key(|p| p.created_at);
        Ok(proposals)
    }

    async fn submit_quote(
        &self,
        id: ProposalId,
        quote: Quote,
        note: Option<String>,
    ) -> Result<TeacherProposal> {
        let mut tables = self.tables.write().await;
        let request_id = tables
            .proposals
            .get(&id)
            .map(|p| p.request_id)
            .ok_or_else(|| DomainError::not_found("proposal", id))?;
        let request = tables.request_mut(request_id)?;
        if !request.status.is_open() {
            return Err(OrderError::InvalidTransition {
                entity: "request",
                current: request.status.as_str(),
                action: "quote on",
            }
            .into());
        }

        let proposal = tables
            .proposals
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("proposal", id))?;
        proposal.submit_quote(quote, note)?;
        Ok(proposal.clone())
    }

    async fn accept_proposal(&self, id: ProposalId) -> Result<Acceptance> {
        let mut tables = self.tables.write().await;

        let mut proposal = tables
            .proposals
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("proposal", id))?;
        let request_id = proposal.request_id;

        let mut request = tables
            .requests
            .get(&request_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("request", request_id))?;

        // Work on copies so a failed rule leaves every table untouched.
        let quote = proposal.accept()?;
        if tables
            .proposals
            .values()
            .any(|p| p.request_id == request_id && p.status == ProposalStatus::Accepted)
        {
            return Err(OrderError::ProposalAlreadyAccepted { request_id }.into());
        }
        request.assign_teacher(proposal.teacher_id)?;

        let session = match tables.session_by_request.get(&request_id) {
            Some(session_id) => {
                let mut session = tables.session(*session_id)?.clone();
                session.relock(proposal.teacher_id, &quote)?;
                session
            }
            None => Session::lock(&request, proposal.teacher_id, &quote),
        };

        for sibling in tables.proposals.values_mut() {
            if sibling.request_id == request_id && sibling.id != id && sibling.status.is_pending()
            {
                sibling.reject();
            }
        }
        tables.proposals.insert(id, proposal.clone());
        tables.requests.insert(request_id, request.clone());
        tables.session_by_request.insert(request_id, session.id);
        tables.sessions.insert(session.id, session.clone());

        Ok(Acceptance {
            request,
            proposal,
            session,
        })
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn session_for_request(&self, request_id: RequestId) -> Result<Option<Session>> {
        let tables = self.tables.read().await;
        Ok(tables
            .session_by_request
            .get(&request_id)
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    async fn mark_session_paid(&self, id: SessionId, amount: &Money) -> Result<CascadeWrite> {
        let mut tables = self.tables.write().await;
        Ok(match tables.sessions.get_mut(&id) {
            Some(session) => session.mark_paid(amount),
            None => CascadeWrite::Skipped(format!("session {id} not found")),
        })
    }

    async fn mark_request_paid(&self, id: RequestId) -> Result<CascadeWrite> {
        let mut tables = self.tables.write().await;
        Ok(match tables.requests.get_mut(&id) {
            Some(request) => request.mark_paid(),
            None => CascadeWrite::Skipped(format!("request {id} not found")),
        })
    }

    async fn schedule_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<Session> {
        let mut tables = self.tables.write().await;
        let mut session = tables.session(id)?.clone();
        let mut request = tables
            .requests
            .get(&session.request_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("request", session.request_id))?;

        session.schedule(at)?;
        request.mark_scheduled()?;

        tables.requests.insert(request.id, request);
        tables.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn complete_session(&self, id: SessionId) -> Result<StudentRequest> {
        let mut tables = self.tables.write().await;
        let request_id = tables.session(id)?.request_id;
        let request = tables.request_mut(request_id)?;
        request.complete()?;
        Ok(request.clone())
    }
}
