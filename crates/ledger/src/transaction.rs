use chrono::{DateTime, Utc};
use common::{Money, RequestId, SessionId, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a ledger transaction.
///
/// State transitions:
/// ```text
/// Initialized ──┬──► Success
///               └──► Failed
/// ```
/// Both `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Initialized,
    Success,
    Failed,
}

impl TransactionStatus {
    /// Returns true once the gateway outcome has been recorded.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, TransactionStatus::Initialized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initialized => "initialized",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Parses the stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initialized" => Some(TransactionStatus::Initialized),
            "success" => Some(TransactionStatus::Success),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The external gateway a transaction was charged through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(String);

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn paystack() -> Self {
        Self("paystack".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference string that does not satisfy the reference format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid payment reference: {0:?}")]
pub struct ReferenceError(pub String);

/// Unique identifier tying a local transaction to one external charge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    /// Longest reference the gateway accepts.
    pub const MAX_LEN: usize = 100;

    /// Longest prefix that still leaves room for a UUID owner and a
    /// microsecond timestamp within `MAX_LEN`.
    pub const MAX_PREFIX_LEN: usize = 40;

    /// Validates a reference received from a client or the gateway.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, ReferenceError> {
        let value = value.as_ref().trim();
        let valid_chars = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '='));
        if value.is_empty() || value.len() > Self::MAX_LEN || !valid_chars {
            return Err(ReferenceError(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Checks that `prefix` can start a generated reference.
    pub fn check_prefix(prefix: &str) -> Result<(), ReferenceError> {
        if prefix.len() > Self::MAX_PREFIX_LEN || prefix != prefix.trim() {
            return Err(ReferenceError(prefix.to_string()));
        }
        Self::parse(prefix).map(|_| ())
    }

    /// Builds `{prefix}_{owner}_{unix micros}`.
    ///
    /// The owner id plus a microsecond timestamp makes collisions practically
    /// impossible; a collision is still reported by the ledger on insert.
    /// The result obeys the same rules as [`Reference::parse`].
    pub fn generate(
        prefix: &str,
        owner: impl std::fmt::Display,
        at: DateTime<Utc>,
    ) -> Result<Self, ReferenceError> {
        Self::check_prefix(prefix)?;
        let candidate = format!("{prefix}_{owner}_{}", at.timestamp_micros());
        let reference = Self::parse(&candidate)?;
        if reference.0 != candidate {
            return Err(ReferenceError(candidate));
        }
        Ok(reference)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entities a transaction pays for. Each link may be unknown at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionLinks {
    pub session_id: Option<SessionId>,
    pub request_id: Option<RequestId>,
    pub student_id: Option<UserId>,
    pub teacher_id: Option<UserId>,
}

/// A recorded payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub provider: Provider,
    pub reference: Reference,
    pub amount: Money,
    pub status: TransactionStatus,
    pub links: TransactionLinks,

    /// Verified gateway payload stored for audit when the status resolves.
    pub raw: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Returns true if `user` is the paying student.
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.links.student_id == Some(user)
    }

    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }
}

/// Input for [`TransactionLedger::create`](crate::TransactionLedger::create).
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: TransactionId,
    pub provider: Provider,
    pub reference: Reference,
    pub amount: Money,
    pub links: TransactionLinks,
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    /// Starts a new `initialized` transaction with no links.
    pub fn new(provider: Provider, reference: Reference, amount: Money) -> Self {
        Self {
            id: TransactionId::new(),
            provider,
            reference,
            amount,
            links: TransactionLinks::default(),
            created_at: Utc::now(),
        }
    }

    pub fn session(mut self, id: SessionId) -> Self {
        self.links.session_id = Some(id);
        self
    }

    pub fn request(mut self, id: RequestId) -> Self {
        self.links.request_id = Some(id);
        self
    }

    pub fn student(mut self, id: UserId) -> Self {
        self.links.student_id = Some(id);
        self
    }

    pub fn teacher(mut self, id: UserId) -> Self {
        self.links.teacher_id = Some(id);
        self
    }

    /// Overrides the creation time. If not set, the current time is used.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// The row as it looks right after insertion.
    pub fn into_transaction(self) -> Transaction {
        Transaction {
            id: self.id,
            provider: self.provider,
            reference: self.reference,
            amount: self.amount,
            status: TransactionStatus::Initialized,
            links: self.links,
            raw: None,
            created_at: self.created_at,
            resolved_at: None,
        }
    }
}
