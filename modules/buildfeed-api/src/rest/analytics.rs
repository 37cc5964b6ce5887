use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::warn;

use buildfeed_events::analytics::{clamp_days, TOP_CONTENT_LIMIT};
use buildfeed_events::AnalyticsReport;
use buildfeed_ranking::cache::keys;
use buildfeed_ranking::CacheStatus;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::rest::aggregate_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    days: Option<u32>,
}

pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response, ApiError> {
    let days = clamp_days(query.days);
    let key = keys::analytics(days);

    match state.cache.get_json::<AnalyticsReport>(&key) {
        Ok(Some(report)) => return Ok(aggregate_response(report, CacheStatus::Hit)),
        Ok(None) => {}
        Err(e) => warn!(key = %key, error = %e, "Discarding unreadable analytics entry"),
    }

    let since = Utc::now() - Duration::days(i64::from(days));
    let report = state.events.analytics(since, TOP_CONTENT_LIMIT).await?;
    if let Err(e) = state.cache.set_json(&key, &report, state.aggregate_ttl) {
        warn!(key = %key, error = %e, "Failed to cache analytics");
    }
    Ok(aggregate_response(report, CacheStatus::Miss))
}
