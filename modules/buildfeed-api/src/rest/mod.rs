pub mod analytics;
pub mod events;
pub mod experiments;
pub mod feed;
pub mod trending;

use axum::http::{header, HeaderName};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use buildfeed_ranking::CacheStatus;

/// Shared aggregates may be cached by the CDN briefly.
pub const AGGREGATE_CACHE_CONTROL: &str = "public, s-maxage=60, stale-while-revalidate=30";
/// Per-user responses must never be cached.
pub const PRIVATE_CACHE_CONTROL: &str = "private, no-store";

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// JSON body for an aggregate endpoint, tagged with its cache status.
pub fn aggregate_response<T: Serialize>(body: T, status: CacheStatus) -> Response {
    (
        [
            (header::CACHE_CONTROL, AGGREGATE_CACHE_CONTROL),
            (X_CACHE, status.as_str()),
        ],
        Json(body),
    )
        .into_response()
}
