use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;

use buildfeed_ranking::trending::clamp_window;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::rest::aggregate_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    hours: Option<u32>,
    limit: Option<usize>,
}

pub async fn get_trending(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Query(query): Query<WindowQuery>,
) -> Result<Response, ApiError> {
    let (hours, limit) = clamp_window(query.hours, query.limit);
    let (posts, status) = state.trending.trending_posts(hours, limit).await?;
    Ok(aggregate_response(
        json!({ "posts": posts, "hours": hours, "limit": limit }),
        status,
    ))
}

pub async fn get_builders(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Query(query): Query<WindowQuery>,
) -> Result<Response, ApiError> {
    let (hours, limit) = clamp_window(query.hours, query.limit);
    let (builders, status) = state.trending.rising_builders(hours, limit).await?;
    Ok(aggregate_response(
        json!({ "builders": builders, "hours": hours, "limit": limit }),
        status,
    ))
}
