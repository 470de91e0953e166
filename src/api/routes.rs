//! API route definitions

use axum::routing::get;
use axum::routing::post;
use axum::Router;

use super::handlers::AppState;
use super::handlers::{
    self,
};

/// Create RESTful API router
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // RAG endpoints; only query and stream pass through admission
        .route("/rag/query", post(handlers::rag_query))
        .route("/rag/stream", post(handlers::rag_stream))
        .route("/rag/health", get(handlers::rag_health))
        .route("/rag/stats", get(handlers::rag_stats))
        .route("/rag/cache/invalidate", post(handlers::invalidate_cache))
        .route("/rag/reload", post(handlers::reload_documents))
        // Admission queue
        .route("/queue", get(handlers::queue_metrics))
        .route("/queue/reset", post(handlers::reset_queue_metrics))
        .with_state(state)
}
