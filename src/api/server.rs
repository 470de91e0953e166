//! HTTP server implementation

use std::time::Duration;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers::AppState;
use crate::api::routes;
use crate::Result;

/// Build the full application router with middleware layers
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .nest("/api", routes::api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    if enable_cors {
        info!("CORS enabled");
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600));
        app = app.layer(cors);
    }

    app
}

/// Start the API server
pub async fn serve_api(state: AppState, host: &str, port: u16, enable_cors: bool) -> Result<()> {
    info!("Starting ragserve API server...");

    match state.rag.retriever().load_documents(false).await {
        Ok(count) => info!("Keyword corpus ready: {} documents", count),
        Err(e) => tracing::warn!("Keyword corpus not loaded yet, will retry on first query: {}", e),
    }

    let app = build_router(state, enable_cors);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API server listening on http://{}", addr);
    info!("Available endpoints:");
    info!("  GET  /api/health               - Server health");
    info!("  POST /api/rag/query            - RAG query");
    info!("  POST /api/rag/stream           - RAG query (SSE)");
    info!("  GET  /api/rag/health           - Pipeline health");
    info!("  GET  /api/rag/stats            - Pipeline statistics");
    info!("  POST /api/rag/cache/invalidate - Invalidate cache");
    info!("  POST /api/rag/reload           - Reload keyword corpus");
    info!("  GET  /api/queue                - Admission metrics");
    info!("  POST /api/queue/reset          - Reset admission metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
