//! Teacher proposal endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{Currency, Money, ProposalId};
use domain::{Acceptance, SubmitQuote, TeacherProposal};
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::{AppState, Stack};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBody {
    pub amount_minor: i64,
    /// Defaults to the marketplace currency.
    pub currency: Option<String>,
    pub duration_minutes: u32,
    pub note: Option<String>,
}

/// PUT /proposals/{id}/quote: the invited teacher submits or revises a quote.
#[tracing::instrument(skip(state, caller, body))]
pub async fn quote<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<ProposalId>,
    Json(body): Json<QuoteBody>,
) -> Result<Json<TeacherProposal>, ApiError> {
    let currency = match body.currency {
        Some(code) => Currency::new(code).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => state.currency.clone(),
    };

    let mut cmd = SubmitQuote::new(
        id,
        Money::from_minor(body.amount_minor, currency),
        body.duration_minutes,
    );
    if let Some(note) = body.note {
        cmd = cmd.with_note(note);
    }
    Ok(Json(state.orders.submit_quote(&caller, cmd).await?))
}

/// POST /proposals/{id}/accept: the student picks this proposal.
#[tracing::instrument(skip(state, caller))]
pub async fn accept<S: Stack>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    Path(id): Path<ProposalId>,
) -> Result<Json<Acceptance>, ApiError> {
    Ok(Json(state.orders.accept_proposal(&caller, id).await?))
}
