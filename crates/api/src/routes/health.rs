//! Health check endpoint.

use axum::Json;
use serde::Serialize;

use crate::Stack;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
}

/// GET /health: liveness plus the storage backend in use.
pub async fn check<S: Stack>() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        storage: S::NAME,
    })
}
