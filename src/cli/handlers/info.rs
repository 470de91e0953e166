//! Information display handlers (health, config)

use crate::app::RagApp;
use crate::cli::output::*;
use crate::AppConfig;
use crate::RagError;
use crate::Result;

fn status(ok: bool) -> &'static str {
    if ok {
        "✅ up"
    } else {
        "❌ down"
    }
}

fn optional_status(state: Option<bool>) -> &'static str {
    state.map_or("➖ disabled", status)
}

pub async fn handle_health(app: &RagApp) -> Result<()> {
    let report = app.rag.health_check().await;
    println!("🩺 Pipeline health");
    println!("  generation: {}", status(report.generation));
    println!("  retrieval:  {}", status(report.retrieval));
    println!("  cache:      {}", optional_status(report.cache));
    println!("  rerank:     {}", optional_status(report.rerank));

    if report.healthy {
        print_success("Pipeline is healthy");
        Ok(())
    } else {
        Err(RagError::Custom(
            "Pipeline is unhealthy: generation and retrieval must both be up".to_string(),
        ))
    }
}

pub fn handle_config(config: &AppConfig) -> Result<()> {
    print_info("Current configuration");
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| RagError::ConfigError(format!("Failed to render configuration: {e}")))?;
    println!("{rendered}");
    Ok(())
}
