use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the caller id, resolved by the upstream auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request. Extract this in every handler
/// that acts on behalf of a user; a missing or malformed id is a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Caller)
            .ok_or(ApiError::Unauthorized)
    }
}
