//! Tutoring request endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{RequestId, UserId};
use domain::{InviteTeachers, OpenRequest, StudentRequest, TeacherProposal};
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::{AppState, Stack};

#[derive(Deserialize)]
pub struct OpenRequestBody {
    pub category: String,
    pub subject: String,
    pub topic: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteBody {
    pub teacher_ids: Vec<UserId>,
}

/// POST /requests: a student opens a request.
#[tracing::instrument(skip(state, caller, body))]
pub async fn open<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Json(body): Json<OpenRequestBody>,
) -> Result<(StatusCode, Json<StudentRequest>), ApiError> {
    let mut cmd = OpenRequest::new(body.category, body.subject);
    if let Some(topic) = body.topic {
        cmd = cmd.with_topic(topic);
    }
    let request = state.orders.open_request(&caller, cmd).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /requests/{id}
#[tracing::instrument(skip(state, caller))]
pub async fn get<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<RequestId>,
) -> Result<Json<StudentRequest>, ApiError> {
    Ok(Json(state.orders.get_request(&caller, id).await?))
}

/// POST /requests/{id}/invitations: admin invites teachers to quote.
#[tracing::instrument(skip(state, caller, body))]
pub async fn invite<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<RequestId>,
    Json(body): Json<InviteBody>,
) -> Result<(StatusCode, Json<Vec<TeacherProposal>>), ApiError> {
    let created = state
        .orders
        .invite_teachers(&caller, InviteTeachers::new(id, body.teacher_ids))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /requests/{id}/proposals
#[tracing::instrument(skip(state, caller))]
pub async fn proposals<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<RequestId>,
) -> Result<Json<Vec<TeacherProposal>>, ApiError> {
    Ok(Json(state.orders.proposals(&caller, id).await?))
}

/// POST /requests/{id}/accept-match
#[tracing::instrument(skip(state, caller))]
pub async fn accept_match<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<RequestId>,
) -> Result<Json<StudentRequest>, ApiError> {
    Ok(Json(state.orders.accept_match(&caller, id).await?))
}

/// POST /requests/{id}/decline-match
#[tracing::instrument(skip(state, caller))]
pub async fn decline_match<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<RequestId>,
) -> Result<Json<StudentRequest>, ApiError> {
    Ok(Json(state.orders.decline_match(&caller, id).await?))
}

/// POST /requests/{id}/cancel
#[tracing::instrument(skip(state, caller))]
pub async fn cancel<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<RequestId>,
) -> Result<Json<StudentRequest>, ApiError> {
    Ok(Json(state.orders.cancel_request(&caller, id).await?))
}
