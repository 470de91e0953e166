//! API request handlers

use axum::http::header;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use tracing::error;
use tracing::warn;

use crate::api::types::ApiResponse;
use crate::api::types::HealthResponse;
use crate::errors::RagError;

pub mod queue;
pub mod rag;

pub use queue::*;
pub use rag::*;

/// Shared application state
pub type AppState = crate::app::RagApp;

/// A [`RagError`] rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self(err)
    }
}

/// HTTP status for an error
pub fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::Validation(_) | RagError::MalformedDocument { .. } => StatusCode::BAD_REQUEST,
        RagError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        RagError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        RagError::RetrievalFailed(_)
        | RagError::LlmError(_)
        | RagError::EmbeddingError(_)
        | RagError::IndexError(_)
        | RagError::HttpError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self.0);
        } else {
            warn!("Request rejected ({}): {}", status, self.0);
        }

        let retry_after = self.0.retry_after();
        let mut response =
            (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Liveness of the HTTP server itself
pub async fn health() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&RagError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&RagError::MalformedDocument {
                index: 0,
                reason: "missing id".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&RagError::Timeout("x".into())), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(&RagError::LlmError("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&RagError::RetrievalFailed("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&RagError::CacheError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_queue_full_sets_retry_after() {
        let response = ApiError(RagError::QueueFull {
            depth: 10,
            max_depth: 10,
            retry_after_secs: 5,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");
    }
}
