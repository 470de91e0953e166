//! API server handlers

use crate::api::serve_api;
use crate::app::RagApp;
use crate::cli::output::*;
use crate::AppConfig;
use crate::Result;

pub async fn handle_serve(
    config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    no_cors: bool,
) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let cors = config.server.cors_enabled && !no_cors;

    println!("🚀 Starting ragserve API Server");
    println!("===============================\n");
    println!("📍 Host: {host}");
    println!("🔌 Port: {port}");
    println!("🌐 CORS: {}", if cors { "Enabled" } else { "Disabled" });
    println!("🤖 Model: {}", config.llm.model);
    println!(
        "🗄️  Index: {} ({})",
        config.index.backend, config.index.collection
    );
    println!(
        "💾 Cache: {}",
        if config.cache.enabled {
            config.cache.backend.as_str()
        } else {
            "disabled"
        }
    );
    println!(
        "🚦 Admission: {} concurrent, {} queued\n",
        config.admission.max_concurrent, config.admission.max_queue_depth
    );

    let app = RagApp::from_config(config).await?;
    print_success("Services initialized");
    serve_api(app, &host, port, cors).await
}
