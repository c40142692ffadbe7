//! Order commands.

use chrono::{DateTime, Utc};
use common::{Money, ProposalId, RequestId, SessionId, UserId};

/// Command to open a new tutoring request.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// The request ID to create.
    pub request_id: RequestId,

    pub category: String,
    pub subject: String,
    pub topic: Option<String>,
}

impl OpenRequest {
    /// Creates a new OpenRequest command with a generated request ID.
    pub fn new(category: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            category: category.into(),
            subject: subject.into(),
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Command to invite teachers to quote on a request.
#[derive(Debug, Clone)]
pub struct InviteTeachers {
    pub request_id: RequestId,

    /// Teachers already invited are skipped.
    pub teacher_ids: Vec<UserId>,
}

impl InviteTeachers {
    pub fn new(request_id: RequestId, teacher_ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            request_id,
            teacher_ids: teacher_ids.into_iter().collect(),
        }
    }
}

/// Command for a teacher to submit or revise a quote.
#[derive(Debug, Clone)]
pub struct SubmitQuote {
    pub proposal_id: ProposalId,
    pub fee: Money,
    pub duration_minutes: u32,
    pub note: Option<String>,
}

impl SubmitQuote {
    pub fn new(proposal_id: ProposalId, fee: Money, duration_minutes: u32) -> Self {
        Self {
            proposal_id,
            fee,
            duration_minutes,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Command to set the time of a paid session.
#[derive(Debug, Clone)]
pub struct ScheduleSession {
    pub session_id: SessionId,
    pub scheduled_at: DateTime<Utc>,
}

impl ScheduleSession {
    pub fn new(session_id: SessionId, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            scheduled_at,
        }
    }
}
