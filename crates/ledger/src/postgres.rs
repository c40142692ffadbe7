use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Currency, Money, RequestId, SessionId, TransactionId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, NewTransaction, Provider, Reference, Result, Transaction, TransactionLinks,
    TransactionStatus, UnresolvedQuery, store::TransactionLedger,
};

const SELECT_COLUMNS: &str = "SELECT id, provider, reference, amount_minor, currency, status, \
     session_id, request_id, student_id, teacher_id, raw, created_at, resolved_at \
     FROM transactions";

/// PostgreSQL-backed ledger implementation.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_transaction(row: PgRow) -> Result<Transaction> {
        let provider: String = row.try_get("provider")?;
        let reference: String = row.try_get("reference")?;
        let currency: String = row.try_get("currency")?;
        let status: String = row.try_get("status")?;

        let reference = Reference::parse(&reference)
            .map_err(|e| LedgerError::CorruptRow(e.to_string()))?;
        let currency =
            Currency::new(&currency).map_err(|e| LedgerError::CorruptRow(e.to_string()))?;
        let status = TransactionStatus::parse(&status)
            .ok_or_else(|| LedgerError::CorruptRow(format!("unknown status {status:?}")))?;

        Ok(Transaction {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            provider: Provider::new(provider),
            reference,
            amount: Money::from_minor(row.try_get("amount_minor")?, currency),
            status,
            links: TransactionLinks {
                session_id: row
                    .try_get::<Option<Uuid>, _>("session_id")?
                    .map(SessionId::from_uuid),
                request_id: row
                    .try_get::<Option<Uuid>, _>("request_id")?
                    .map(RequestId::from_uuid),
                student_id: row
                    .try_get::<Option<Uuid>, _>("student_id")?
                    .map(UserId::from_uuid),
                teacher_id: row
                    .try_get::<Option<Uuid>, _>("teacher_id")?
                    .map(UserId::from_uuid),
            },
            raw: row.try_get("raw")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            resolved_at: row.try_get::<Option<DateTime<Utc>>, _>("resolved_at")?,
        })
    }

    async fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        raw: serde_json::Value,
    ) -> Result<bool> {
        // The status guard makes the first writer the only writer.
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, raw = $3, resolved_at = NOW()
            WHERE id = $1 AND status = 'initialized'
            "#,
        )
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(raw)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            tracing::debug!(transaction_id = %id, to = %to, "transition skipped, already resolved");
        }
        Ok(applied)
    }
}

#[async_trait]
impl TransactionLedger for PostgresLedger {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let transaction = new.into_transaction();

        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, provider, reference, amount_minor, currency, status,
                session_id, request_id, student_id, teacher_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.provider.as_str())
        .bind(transaction.reference.as_str())
        .bind(transaction.amount.minor())
        .bind(transaction.amount.currency().as_str())
        .bind(transaction.status.as_str())
        .bind(transaction.links.session_id.map(|id| id.as_uuid()))
        .bind(transaction.links.request_id.map(|id| id.as_uuid()))
        .bind(transaction.links.student_id.map(|id| id.as_uuid()))
        .bind(transaction.links.teacher_id.map(|id| id.as_uuid()))
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_transaction_reference")
            {
                return LedgerError::DuplicateReference(transaction.reference.clone());
            }
            LedgerError::Database(e)
        })?;

        Ok(transaction)
    }

    async fn find_by_reference(
        &self,
        provider: &Provider,
        reference: &Reference,
    ) -> Result<Option<Transaction>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE provider = $1 AND reference = $2"
        ))
        .bind(provider.as_str())
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn transition_to_success(
        &self,
        id: TransactionId,
        raw: serde_json::Value,
    ) -> Result<bool> {
        self.transition(id, TransactionStatus::Success, raw).await
    }

    async fn transition_to_failed(
        &self,
        id: TransactionId,
        raw: serde_json::Value,
    ) -> Result<bool> {
        self.transition(id, TransactionStatus::Failed, raw).await
    }

    async fn find_unresolved(&self, query: &UnresolvedQuery) -> Result<Vec<Transaction>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE status = 'initialized'");
        let mut param_count = 0;

        if query.student_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND student_id = ${param_count}"));
        }
        if query.provider.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND provider = ${param_count}"));
        }
        if query.created_after.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.created_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at < ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(student) = query.student_id {
            sqlx_query = sqlx_query.bind(student.as_uuid());
        }
        if let Some(ref provider) = query.provider {
            sqlx_query = sqlx_query.bind(provider.as_str());
        }
        if let Some(after) = query.created_after {
            sqlx_query = sqlx_query.bind(after);
        }
        if let Some(before) = query.created_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_transaction).collect()
    }
}
