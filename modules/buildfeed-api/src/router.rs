use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::rate_limit;
use crate::rest;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/feed", get(rest::feed::get_feed))
        .route("/feed/events", post(rest::events::post_events))
        .route(
            "/feed/experiments/{id}/results",
            get(rest::experiments::get_results),
        )
        .route(
            "/feed/experiments/{id}/assignment",
            get(rest::experiments::get_assignment),
        )
        .route("/feed/trending", get(rest::trending::get_trending))
        .route("/feed/builders", get(rest::trending::get_builders))
        .route("/feed/analytics", get(rest::analytics::get_analytics))
        // Everything above is rate limited; the health check is not.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Method, path, status and latency only; no query strings or user ids.
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
