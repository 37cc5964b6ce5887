use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::warn;

use buildfeed_common::PageToken;
use buildfeed_ranking::FeedRequest;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::rest::PRIVATE_CACHE_CONTROL;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    cursor: Option<String>,
    offset: Option<u64>,
    page: Option<String>,
}

/// Offsets are bound as Postgres BIGINT.
const MAX_OFFSET: u64 = i64::MAX as u64;

fn check_offset(offset: u64) -> Result<u64, ApiError> {
    if offset > MAX_OFFSET {
        return Err(ApiError::BadRequest(format!("offset {offset} is out of range")));
    }
    Ok(offset)
}

impl FeedQuery {
    fn into_request(self) -> Result<FeedRequest, ApiError> {
        let page = self
            .page
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<PageToken>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if let Some(PageToken::Offset(offset)) = &page {
            check_offset(*offset)?;
        }
        let offset = self.offset.map(check_offset).transpose()?;
        Ok(FeedRequest {
            cursor: self.cursor,
            offset,
            page,
        })
    }
}

pub async fn get_feed(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Query(query): Query<FeedQuery>,
) -> Result<Response, ApiError> {
    let request = query.into_request()?;

    match state.feed.load_feed(user_id, request).await {
        Ok(page) => Ok(([(header::CACHE_CONTROL, PRIVATE_CACHE_CONTROL)], Json(page)).into_response()),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to load feed");
            let body = serde_json::json!({
                "error": "INTERNAL_ERROR",
                "message": "Failed to load feed",
                "posts": [],
                "cursor": null,
                "offset": null,
                "has_more": false,
            });
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CACHE_CONTROL, PRIVATE_CACHE_CONTROL)],
                Json(body),
            )
                .into_response())
        }
    }
}
