use chrono::{DateTime, Utc};
use common::UserId;

use crate::Provider;

/// Builder for selecting `initialized` transactions.
///
/// Results are ordered newest first. Every filter left unset matches all
/// rows, so callers that act on the results (the sweeper) must always set an
/// owner, a lower time bound and a limit.
#[derive(Debug, Clone, Default)]
pub struct UnresolvedQuery {
    /// Filter by paying student.
    pub student_id: Option<UserId>,

    /// Filter by gateway.
    pub provider: Option<Provider>,

    /// Only transactions created at or after this time.
    pub created_after: Option<DateTime<Utc>>,

    /// Only transactions created strictly before this time.
    pub created_before: Option<DateTime<Utc>>,

    /// Maximum number of transactions to return.
    pub limit: Option<usize>,
}

impl UnresolvedQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one student's transactions.
    pub fn for_student(student_id: UserId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Default::default()
        }
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `created_at` falls inside the time bounds.
    pub fn covers(&self, created_at: DateTime<Utc>) -> bool {
        if let Some(after) = self.created_after
            && created_at < after
        {
            return false;
        }
        if let Some(before) = self.created_before
            && created_at >= before
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn query_for_student() {
        let id = UserId::new();
        let query = UnresolvedQuery::for_student(id);

        assert_eq!(query.student_id, Some(id));
        assert!(query.limit.is_none());
    }

    #[test]
    fn query_builder_chain() {
        let now = Utc::now();
        let query = UnresolvedQuery::new()
            .provider(Provider::paystack())
            .created_after(now - Duration::minutes(120))
            .limit(10);

        assert_eq!(query.provider, Some(Provider::paystack()));
        assert_eq!(query.limit, Some(10));
        assert!(query.created_before.is_none());
    }

    #[test]
    fn covers_respects_window() {
        let now = Utc::now();
        let query = UnresolvedQuery::new()
            .created_after(now - Duration::minutes(10))
            .created_before(now);

        assert!(query.covers(now - Duration::minutes(5)));
        assert!(query.covers(now - Duration::minutes(10)));
        assert!(!query.covers(now - Duration::minutes(11)));
        assert!(!query.covers(now));
    }
}
