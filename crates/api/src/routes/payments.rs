//! Checkout, webhook, verification and reconciliation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use common::SessionId;
use ledger::{Reference, Transaction};
use serde::{Deserialize, Serialize};
use settlement::{
    CheckoutHandle, NotificationOutcome, SIGNATURE_HEADER, SettlementError, StatusSnapshot,
    SweepReport,
};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::{AppState, Stack};

const DEFAULT_STALE_LIMIT: usize = 50;
const MAX_STALE_LIMIT: usize = 200;

// -- Request types --

#[derive(Deserialize)]
pub struct ReferenceQuery {
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

impl ReferenceQuery {
    fn parse(&self) -> Result<Reference, ApiError> {
        let raw = self
            .reference
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("Missing ref query parameter".into()))?;
        Reference::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub session_id: SessionId,
}

#[derive(Deserialize)]
pub struct StaleQuery {
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub ok: bool,
}

// -- Handlers --

/// POST /payments/webhook: signed gateway notification.
///
/// The body is taken as raw bytes so the signature is checked against
/// exactly what was sent. The response never carries error details.
#[tracing::instrument(skip_all)]
pub async fn webhook<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let status = match state.payments.handle_notification(&body, signature).await {
        Ok(NotificationOutcome::Processed(outcome)) => {
            tracing::info!(outcome = outcome.as_str(), "webhook processed");
            StatusCode::OK
        }
        Ok(NotificationOutcome::Ignored { .. }) => StatusCode::OK,
        Err(SettlementError::Signature(_)) => StatusCode::UNAUTHORIZED,
        Err(SettlementError::MalformedNotification(_)) => StatusCode::BAD_REQUEST,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(WebhookAck {
            ok: status == StatusCode::OK,
        }),
    )
}

/// GET /payments/verify?ref=: confirm with the gateway after the redirect back.
#[tracing::instrument(skip(state, caller, query))]
pub async fn verify<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Query(query): Query<ReferenceQuery>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    let reference = query.parse()?;
    Ok(Json(state.payments.verify(&caller, &reference).await?))
}

/// GET /payments/status?ref=: local read, no gateway call.
#[tracing::instrument(skip(state, caller, query))]
pub async fn status<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Query(query): Query<ReferenceQuery>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    let reference = query.parse()?;
    Ok(Json(state.payments.status(&caller, &reference).await?))
}

/// POST /payments/checkout: start paying for a session.
#[tracing::instrument(skip(state, caller, req))]
pub async fn checkout<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutHandle>), ApiError> {
    let handle = state.payments.checkout(&caller, req.session_id).await?;
    Ok((StatusCode::CREATED, Json(handle)))
}

/// POST /payments/reconcile: sweep the caller's recent unresolved payments.
#[tracing::instrument(skip(state, caller))]
pub async fn reconcile<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.payments.reconcile(&caller).await?))
}

/// GET /admin/payments/stale: unresolved payments older than the sweep window.
#[tracing::instrument(skip(state, caller, query))]
pub async fn stale<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Query(query): Query<StaleQuery>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_STALE_LIMIT)
        .clamp(1, MAX_STALE_LIMIT);
    Ok(Json(state.payments.stale(&caller, limit).await?))
}
