//! HTTP error type. Every domain error maps into one of these explicitly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use buildfeed_common::FeedError;
use buildfeed_events::IngestError;
use buildfeed_experiments::ExperimentError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// Shown in place of internal error details, which stay in the logs.
const INTERNAL_MESSAGE: &str = "Internal server error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(error_code = self.code(), detail = %detail, "Internal API error");
                INTERNAL_MESSAGE.to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorResponse {
            error: self.code(),
            message,
        };

        tracing::warn!(
            error_code = body.error,
            error_message = %body.message,
            status = status.as_u16(),
            "API error"
        );

        (status, Json(body)).into_response()
    }
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Validation(msg) => Self::BadRequest(msg),
            FeedError::NotFound(msg) => Self::NotFound(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::InvalidBody(_) | IngestError::BatchTooLarge { .. } => {
                Self::BadRequest(e.to_string())
            }
            IngestError::Forbidden => Self::Forbidden(e.to_string()),
            IngestError::Store(e) => Self::internal(e.to_string()),
        }
    }
}

impl From<ExperimentError> for ApiError {
    fn from(e: ExperimentError) -> Self {
        match e {
            ExperimentError::NotFound(_) => Self::NotFound(e.to_string()),
            ExperimentError::InsufficientVariants(_) => Self::BadRequest(e.to_string()),
            ExperimentError::Store(e) => Self::internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (IngestError::Forbidden.into(), StatusCode::FORBIDDEN),
            (
                IngestError::BatchTooLarge { size: 101, max: 100 }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                ExperimentError::NotFound(Uuid::nil()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                ExperimentError::InsufficientVariants(1).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                FeedError::Database("down".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[tokio::test]
    async fn internal_details_stay_out_of_responses() {
        let err: ApiError =
            IngestError::Store(anyhow::anyhow!("connection refused to 10.0.0.5:5432")).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "INTERNAL_ERROR");
        assert_eq!(body["message"], INTERNAL_MESSAGE);
        assert!(!bytes.windows(8).any(|w| w == b"10.0.0.5"));
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let response = ApiError::BadRequest("offset out of range".into()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "bad request: offset out of range");
    }
}
