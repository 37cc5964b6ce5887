use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use buildfeed_experiments::ExperimentResults;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_results(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(experiment_id): Path<Uuid>,
) -> Result<Json<ExperimentResults>, ApiError> {
    let results = state.analyzer.results(experiment_id).await?;
    Ok(Json(results))
}

/// The caller's variant, assigning one on first request.
pub async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(experiment_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let assignment = state
        .assigner
        .assign(experiment_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no running experiment {experiment_id}")))?;

    Ok(Json(json!({
        "experiment_id": assignment.experiment_id,
        "variant_id": assignment.variant_id,
        "variant": assignment.variant,
    })))
}
