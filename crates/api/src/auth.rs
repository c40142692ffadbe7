//! Caller identity extracted from headers set by the upstream identity layer.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::{Principal, Role, UserId};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The authenticated principal for a request.
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn reject(reason: &'static str) -> ApiError {
    metrics::counter!("http_unauthenticated_total", "reason" => reason).increment(1);
    ApiError::Unauthenticated(format!("Unauthenticated: {reason}"))
}

pub(crate) fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let user_id: UserId = header(headers, USER_ID_HEADER)
        .ok_or_else(|| reject("missing user id"))?
        .parse()
        .map_err(|_| reject("invalid user id"))?;
    let role: Role = header(headers, USER_ROLE_HEADER)
        .ok_or_else(|| reject("missing role"))?
        .parse()
        .map_err(|_| reject("invalid role"))?;

    let principal = Principal::new(user_id, role);
    Ok(match header(headers, USER_EMAIL_HEADER) {
        Some(email) => principal.with_email(email),
        None => principal,
    })
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers).map(Caller)
    }
}
