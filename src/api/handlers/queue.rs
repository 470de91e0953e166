//! Admission queue handlers

use axum::extract::State;
use axum::Json;
use tracing::info;

use super::AppState;
use crate::admission::QueueMetrics;
use crate::api::types::ApiResponse;

/// GET /api/queue
pub async fn queue_metrics(State(state): State<AppState>) -> Json<ApiResponse<QueueMetrics>> {
    Json(ApiResponse::success(state.admission.metrics()))
}

/// POST /api/queue/reset
pub async fn reset_queue_metrics(State(state): State<AppState>) -> Json<ApiResponse<QueueMetrics>> {
    info!("POST /api/queue/reset");
    state.admission.reset_metrics();
    Json(ApiResponse::success(state.admission.metrics()))
}
