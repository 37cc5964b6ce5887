use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use buildfeed_events::IngestRequest;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Accepts either a session lifecycle message or a batch of events.
pub async fn post_events(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    match IngestRequest::from_json(body)? {
        IngestRequest::Session(control) => {
            state.ingestor.apply_session(user_id, control).await?;
            Ok(Json(json!({ "ok": true })))
        }
        IngestRequest::Batch(events) => {
            let outcome = state.ingestor.ingest_batch(user_id, events).await?;
            Ok(Json(json!({ "ok": true, "inserted": outcome.inserted })))
        }
    }
}
