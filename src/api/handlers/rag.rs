//! RAG-related API handlers

use std::convert::Infallible;

use axum::extract::Query;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderName;
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use tracing::error;
use tracing::info;

use super::ApiError;
use super::AppState;
use crate::api::types::ApiResponse;
use crate::api::types::InvalidateRequest;
use crate::api::types::InvalidateResponse;
use crate::api::types::RagQueryRequest;
use crate::api::types::ReloadResponse;
use crate::api::types::WorkspaceQuery;
use crate::llm::StreamFrame;
use crate::models::ResponseEnvelope;
use crate::rag::HealthReport;
use crate::rag::PipelineStats;
use crate::rag::QueryOptions;

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

fn query_options(state: &AppState, req: &RagQueryRequest) -> QueryOptions {
    req.to_options(QueryOptions::from_config(&state.config))
}

/// POST /api/rag/query
pub async fn rag_query(
    State(state): State<AppState>,
    Json(req): Json<RagQueryRequest>,
) -> Result<Json<ApiResponse<ResponseEnvelope>>, ApiError> {
    info!("POST /api/rag/query: {} chars", req.message.len());
    req.validate()?;
    let options = query_options(&state, &req);

    let response = state
        .admission
        .run(state.rag.query(&req.message, &options))
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// POST /api/rag/stream
///
/// The admission permit moves into the event stream and is released when
/// the stream ends or the client disconnects.
pub async fn rag_stream(
    State(state): State<AppState>,
    Json(req): Json<RagQueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("POST /api/rag/stream: {} chars", req.message.len());
    req.validate()?;
    let options = query_options(&state, &req);

    let permit = state.admission.acquire().await?;
    let mut frames = state.rag.query_stream(&req.message, &options)?;

    let events = async_stream::stream! {
        let _permit = permit;
        while let Some(frame) = frames.next().await {
            let data = serde_json::to_string(&frame).unwrap_or_else(|e| {
                error!("Failed to serialize stream frame: {}", e);
                serde_json::to_string(&StreamFrame::error("Streaming error: serialization failed"))
                    .unwrap_or_default()
            });
            yield Ok::<_, Infallible>(Event::default().data(data));
        }
    };

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

/// GET /api/rag/health
pub async fn rag_health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthReport>>) {
    let report = state.rag.health_check().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::success(report)))
}

/// GET /api/rag/stats
pub async fn rag_stats(
    State(state): State<AppState>,
    Query(query): Query<WorkspaceQuery>,
) -> Json<ApiResponse<PipelineStats>> {
    Json(ApiResponse::success(
        state.rag.stats(query.workspace.as_deref()).await,
    ))
}

/// POST /api/rag/cache/invalidate
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<ApiResponse<InvalidateResponse>>, ApiError> {
    let workspace = req
        .workspace
        .unwrap_or_else(|| state.config.pipeline.default_workspace.clone());
    info!("POST /api/rag/cache/invalidate: workspace={}", workspace);

    let removed = state
        .rag
        .invalidate_cache(&workspace, req.query.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(InvalidateResponse { workspace, removed })))
}

/// POST /api/rag/reload
pub async fn reload_documents(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ReloadResponse>>, ApiError> {
    info!("POST /api/rag/reload");
    let documents = state.rag.reload_documents().await?;
    Ok(Json(ApiResponse::success(ReloadResponse { documents })))
}
