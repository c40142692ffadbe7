use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Currency, Money, ProposalId, RequestId, SessionId, UserId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::order::{
    CascadeWrite, OrderError, PaymentStatus, ProposalStatus, Quote, RequestStatus, Session,
    StudentRequest, TeacherProposal,
};
use crate::repository::{Acceptance, OrderRepository};
use crate::{DomainError, Result};

const REQUEST_COLUMNS: &str = "SELECT id, student_id, category, subject, topic, status, \
     matched_teacher_id, version, created_at, updated_at FROM student_requests";

const PROPOSAL_COLUMNS: &str = "SELECT id, request_id, teacher_id, status, fee_minor, currency, \
     duration_minutes, note, created_at, updated_at FROM teacher_proposals";

const SESSION_COLUMNS: &str = "SELECT id, request_id, student_id, teacher_id, price_minor, \
     currency, duration_minutes, payment_status, scheduled_at, version, created_at, updated_at \
     FROM sessions";

/// PostgreSQL-backed order repository.
///
/// Mutations lock the affected rows with `SELECT ... FOR UPDATE` inside one
/// database transaction, apply the entity's transition rule and write the
/// result back. Locks are always taken request first, then proposal, then
/// session.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

fn corrupt(what: impl std::fmt::Display) -> DomainError {
    DomainError::CorruptRow(what.to_string())
}

fn currency(code: &str) -> Result<Currency> {
    Currency::new(code).map_err(corrupt)
}

fn minutes(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(corrupt)
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_request(row: PgRow) -> Result<StudentRequest> {
        let status: String = row.try_get("status")?;
        Ok(StudentRequest {
            id: RequestId::from_uuid(row.try_get::<Uuid, _>("id")?),
            student_id: UserId::from_uuid(row.try_get::<Uuid, _>("student_id")?),
            category: row.try_get("category")?,
            subject: row.try_get("subject")?,
            topic: row.try_get("topic")?,
            status: RequestStatus::parse(&status)
                .ok_or_else(|| corrupt(format!("request status {status:?}")))?,
            matched_teacher_id: row
                .try_get::<Option<Uuid>, _>("matched_teacher_id")?
                .map(UserId::from_uuid),
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_proposal(row: PgRow) -> Result<TeacherProposal> {
        let status: String = row.try_get("status")?;
        let fee: Option<i64> = row.try_get("fee_minor")?;
        let code: Option<String> = row.try_get("currency")?;
        let duration: Option<i32> = row.try_get("duration_minutes")?;

        let quote = match (fee, code, duration) {
            (Some(fee), Some(code), Some(duration)) => Some(Quote {
                fee: Money::from_minor(fee, currency(&code)?),
                duration_minutes: minutes(duration)?,
            }),
            _ => None,
        };

        Ok(TeacherProposal {
            id: ProposalId::from_uuid(row.try_get::<Uuid, _>("id")?),
            request_id: RequestId::from_uuid(row.try_get::<Uuid, _>("request_id")?),
            teacher_id: UserId::from_uuid(row.try_get::<Uuid, _>("teacher_id")?),
            status: ProposalStatus::parse(&status)
                .ok_or_else(|| corrupt(format!("proposal status {status:?}")))?,
            quote,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_session(row: PgRow) -> Result<Session> {
        let status: String = row.try_get("payment_status")?;
        let code: String = row.try_get("currency")?;
        Ok(Session {
            id: SessionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            request_id: RequestId::from_uuid(row.try_get::<Uuid, _>("request_id")?),
            student_id: UserId::from_uuid(row.try_get::<Uuid, _>("student_id")?),
            teacher_id: UserId::from_uuid(row.try_get::<Uuid, _>("teacher_id")?),
            price: Money::from_minor(row.try_get("price_minor")?, currency(&code)?),
            duration_minutes: minutes(row.try_get("duration_minutes")?)?,
            payment_status: PaymentStatus::parse(&status)
                .ok_or_else(|| corrupt(format!("payment status {status:?}")))?,
            scheduled_at: row.try_get("scheduled_at")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn lock_request(
        tx: &mut Transaction<'_, Postgres>,
        id: RequestId,
    ) -> Result<Option<StudentRequest>> {
        sqlx::query(&format!("{REQUEST_COLUMNS} WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?
            .map(Self::row_to_request)
            .transpose()
    }

    async fn lock_existing_request(
        tx: &mut Transaction<'_, Postgres>,
        id: RequestId,
    ) -> Result<StudentRequest> {
        Self::lock_request(tx, id)
            .await?
            .ok_or_else(|| DomainError::not_found("request", id))
    }

    async fn lock_proposal(
        tx: &mut Transaction<'_, Postgres>,
        id: ProposalId,
    ) -> Result<TeacherProposal> {
        sqlx::query(&format!("{PROPOSAL_COLUMNS} WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?
            .map(Self::row_to_proposal)
            .transpose()?
            .ok_or_else(|| DomainError::not_found("proposal", id))
    }

    async fn lock_session_where(
        tx: &mut Transaction<'_, Postgres>,
        column: &str,
        id: Uuid,
    ) -> Result<Option<Session>> {
        sqlx::query(&format!("{SESSION_COLUMNS} WHERE {column} = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .map(Self::row_to_session)
            .transpose()
    }

    async fn write_request(
        tx: &mut Transaction<'_, Postgres>,
        request: &StudentRequest,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE student_requests
            SET status = $2, matched_teacher_id = $3, version = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.status.as_str())
        .bind(request.matched_teacher_id.map(|id| id.as_uuid()))
        .bind(request.version)
        .bind(request.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_proposal(
        tx: &mut Transaction<'_, Postgres>,
        proposal: &TeacherProposal,
    ) -> Result<()> {
        let quote = proposal.quote.as_ref();
        sqlx::query(
            r#"
            UPDATE teacher_proposals
            SET status = $2, fee_minor = $3, currency = $4, duration_minutes = $5,
                note = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(proposal.id.as_uuid())
        .bind(proposal.status.as_str())
        .bind(quote.map(|q| q.fee.minor()))
        .bind(quote.map(|q| q.fee.currency().as_str().to_string()))
        .bind(quote.map(|q| q.duration_minutes as i32))
        .bind(&proposal.note)
        .bind(proposal.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_accepted_proposal")
            {
                return DomainError::Order(OrderError::ProposalAlreadyAccepted {
                    request_id: proposal.request_id,
                });
            }
            DomainError::Database(e)
        })?;
        Ok(())
    }

    async fn write_session(tx: &mut Transaction<'_, Postgres>, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, request_id, student_id, teacher_id, price_minor, currency,
                duration_minutes, payment_status, scheduled_at, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (request_id) DO UPDATE SET
                teacher_id = EXCLUDED.teacher_id,
                price_minor = EXCLUDED.price_minor,
                currency = EXCLUDED.currency,
                duration_minutes = EXCLUDED.duration_minutes,
                payment_status = EXCLUDED.payment_status,
                scheduled_at = EXCLUDED.scheduled_at,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.request_id.as_uuid())
        .bind(session.student_id.as_uuid())
        .bind(session.teacher_id.as_uuid())
        .bind(session.price.minor())
        .bind(session.price.currency().as_str())
        .bind(session.duration_minutes as i32)
        .bind(session.payment_status.as_str())
        .bind(session.scheduled_at)
        .bind(session.version)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Locks a request, applies `apply` and writes it back.
    async fn update_request<F>(&self, id: RequestId, apply: F) -> Result<StudentRequest>
    where
        F: FnOnce(&mut StudentRequest) -> std::result::Result<(), OrderError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let mut request = Self::lock_existing_request(&mut tx, id).await?;
        apply(&mut request)?;
        Self::write_request(&mut tx, &request).await?;
        tx.commit().await?;
        Ok(request)
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert_request(&self, request: StudentRequest) -> Result<StudentRequest> {
        sqlx::query(
            r#"
            INSERT INTO student_requests (
                id, student_id, category, subject, topic, status,
                matched_teacher_id, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.student_id.as_uuid())
        .bind(&request.category)
        .bind(&request.subject)
        .bind(&request.topic)
        .bind(request.status.as_str())
        .bind(request.matched_teacher_id.map(|id| id.as_uuid()))
        .bind(request.version)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(request)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<StudentRequest>> {
        sqlx::query(&format!("{REQUEST_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_request)
            .transpose()
    }

    async fn confirm_match(&self, id: RequestId) -> Result<StudentRequest> {
        self.update_request(id, |r| r.confirm_match()).await
    }

    async fn decline_match(&self, id: RequestId) -> Result<StudentRequest> {
        let mut tx = self.pool.begin().await?;
        let mut request = Self::lock_existing_request(&mut tx, id).await?;
        request.decline_match()?;
        Self::write_request(&mut tx, &request).await?;

        sqlx::query(
            r#"
            UPDATE teacher_proposals
            SET status = 'rejected', updated_at = NOW()
            WHERE request_id = $1 AND status = 'accepted'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn cancel_request(&self, id: RequestId) -> Result<StudentRequest> {
        self.update_request(id, |r| r.cancel()).await
    }

    async fn invite_teachers(
        &self,
        request_id: RequestId,
        teacher_ids: &[UserId],
    ) -> Result<Vec<TeacherProposal>> {
        let mut tx = self.pool.begin().await?;
        let request = Self::lock_existing_request(&mut tx, request_id).await?;
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
            let proposal = TeacherProposal::invite(request_id, teacher_id);
            let result = sqlx::query(
                r#"
                INSERT INTO teacher_proposals (id, request_id, teacher_id, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (request_id, teacher_id) DO NOTHING
                "#,
            )
            .bind(proposal.id.as_uuid())
            .bind(request_id.as_uuid())
            .bind(teacher_id.as_uuid())
            .bind(proposal.status.as_str())
            .bind(proposal.created_at)
            .bind(proposal.updated_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                created.push(proposal);
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<TeacherProposal>> {
        sqlx::query(&format!("{PROPOSAL_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_proposal)
            .transpose()
    }

    async fn proposals_for_request(&self, request_id: RequestId) -> Result<Vec<TeacherProposal>> {
        let rows = sqlx::query(&format!(
            "{PROPOSAL_COLUMNS} WHERE request_id = $1 ORDER BY created_at ASC"
        ))
        .bind(request_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_proposal).collect()
    }

    async fn submit_quote(
        &self,
        id: ProposalId,
        quote: Quote,
        note: Option<String>,
    ) -> Result<TeacherProposal> {
        let request_id = self
            .get_proposal(id)
            .await?
            .ok_or_else(|| DomainError::not_found("proposal", id))?
            .request_id;

        let mut tx = self.pool.begin().await?;
        let request = Self::lock_existing_request(&mut tx, request_id).await?;
        if !request.status.is_open() {
            return Err(OrderError::InvalidTransition {
                entity: "request",
                current: request.status.as_str(),
                action: "quote on",
            }
            .into());
        }

        let mut proposal = Self::lock_proposal(&mut tx, id).await?;
        proposal.submit_quote(quote, note)?;
        Self::write_proposal(&mut tx, &proposal).await?;

        tx.commit().await?;
        Ok(proposal)
    }

    async fn accept_proposal(&self, id: ProposalId) -> Result<Acceptance> {
        let request_id = self
            .get_proposal(id)
            .await?
            .ok_or_else(|| DomainError::not_found("proposal", id))?
            .request_id;

        let mut tx = self.pool.begin().await?;
        let mut request = Self::lock_existing_request(&mut tx, request_id).await?;
        let mut proposal = Self::lock_proposal(&mut tx, id).await?;

        let quote = proposal.accept()?;
        let already_accepted: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM teacher_proposals WHERE request_id = $1 AND status = 'accepted')",
        )
        .bind(request_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;
        if already_accepted {
            return Err(OrderError::ProposalAlreadyAccepted { request_id }.into());
        }
        request.assign_teacher(proposal.teacher_id)?;

        let session =
            match Self::lock_session_where(&mut tx, "request_id", request_id.as_uuid()).await? {
                Some(mut session) => {
                    session.relock(proposal.teacher_id, &quote)?;
                    session
                }
                None => Session::lock(&request, proposal.teacher_id, &quote),
            };

        sqlx::query(
            r#"
            UPDATE teacher_proposals
            SET status = 'rejected', updated_at = NOW()
            WHERE request_id = $1 AND id <> $2 AND status IN ('invited', 'submitted')
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;

        Self::write_proposal(&mut tx, &proposal).await?;
        Self::write_request(&mut tx, &request).await?;
        Self::write_session(&mut tx, &session).await?;

        tx.commit().await?;

        Ok(Acceptance {
            request,
            proposal,
            session,
        })
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        sqlx::query(&format!("{SESSION_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_session)
            .transpose()
    }

    async fn session_for_request(&self, request_id: RequestId) -> Result<Option<Session>> {
        sqlx::query(&format!("{SESSION_COLUMNS} WHERE request_id = $1"))
            .bind(request_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_session)
            .transpose()
    }

    async fn mark_session_paid(&self, id: SessionId, amount: &Money) -> Result<CascadeWrite> {
        let mut tx = self.pool.begin().await?;
        let Some(mut session) = Self::lock_session_where(&mut tx, "id", id.as_uuid()).await? else {
            return Ok(CascadeWrite::Skipped(format!("session {id} not found")));
        };

        let outcome = session.mark_paid(amount);
        if outcome.is_applied() {
            Self::write_session(&mut tx, &session).await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    async fn mark_request_paid(&self, id: RequestId) -> Result<CascadeWrite> {
        let mut tx = self.pool.begin().await?;
        let Some(mut request) = Self::lock_request(&mut tx, id).await? else {
            return Ok(CascadeWrite::Skipped(format!("request {id} not found")));
        };

        let outcome = request.mark_paid();
        if outcome.is_applied() {
            Self::write_request(&mut tx, &request).await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    async fn schedule_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<Session> {
        let request_id = self
            .get_session(id)
            .await?
            .ok_or_else(|| DomainError::not_found("session", id))?
            .request_id;

        let mut tx = self.pool.begin().await?;
        let mut request = Self::lock_existing_request(&mut tx, request_id).await?;
        let mut session = Self::lock_session_where(&mut tx, "id", id.as_uuid())
            .await?
            .ok_or_else(|| DomainError::not_found("session", id))?;

        session.schedule(at)?;
        request.mark_scheduled()?;

        Self::write_request(&mut tx, &request).await?;
        Self::write_session(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(session)
    }

    async fn complete_session(&self, id: SessionId) -> Result<StudentRequest> {
        let request_id = self
            .get_session(id)
            .await?
            .ok_or_else(|| DomainError::not_found("session", id))?
            .request_id;

        self.update_request(request_id, |r| r.complete()).await
    }
}
