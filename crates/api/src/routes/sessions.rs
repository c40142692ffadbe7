//! Session endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::SessionId;
use domain::{ScheduleSession, Session, StudentRequest};
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::{AppState, Stack};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBody {
    pub scheduled_at: DateTime<Utc>,
}

/// GET /sessions/{id}
#[tracing::instrument(skip(state, caller))]
pub async fn get<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<SessionId>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.orders.get_session(&caller, id).await?))
}

/// POST /sessions/{id}/schedule: only once the session is paid.
#[tracing::instrument(skip(state, caller, body))]
pub async fn schedule<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<SessionId>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<Session>, ApiError> {
    let cmd = ScheduleSession::new(id, body.scheduled_at);
    Ok(Json(state.orders.schedule_session(&caller, cmd).await?))
}

/// POST /sessions/{id}/complete
#[tracing::instrument(skip(state, caller))]
pub async fn complete<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<SessionId>,
) -> Result<Json<StudentRequest>, ApiError> {
    Ok(Json(state.orders.complete_session(&caller, id).await?))
}
