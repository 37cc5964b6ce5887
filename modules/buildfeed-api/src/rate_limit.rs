//! Fixed-window request limiting per client key.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Per-instance limiter; counts are not shared across replicas.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests: max_requests.max(1),
            window: window.max(Duration::from_secs(1)),
        }
    }

    /// Count one request for `key`. Returns the time until the window resets
    /// when the key is over its limit.
    pub async fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + self.window,
        });
        if now >= window.resets_at {
            *window = Window {
                count: 0,
                resets_at: now + self.window,
            };
        }
        if window.count >= self.max_requests {
            return Err(window.resets_at.saturating_duration_since(now));
        }
        window.count += 1;
        Ok(())
    }

    /// Drop windows that have already reset. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| w.resets_at > now);
        before - windows.len()
    }

    pub async fn clear(&self) {
        self.windows.lock().await.clear();
    }

    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }
}

/// Client key: first `x-forwarded-for` hop, else the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware rejecting over-limit clients with 429 and `Retry-After`.
pub async fn enforce(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = client_key(request.headers(), peer);

    match state.limiter.check(&key).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
            too_many_requests(retry_after)
        }
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
    let body = serde_json::json!({
        "error": "RATE_LIMITED",
        "message": format!("Too many requests, retry in {secs}s"),
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}
