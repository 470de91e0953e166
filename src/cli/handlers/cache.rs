//! Semantic cache handlers

use crate::app::RagApp;
use crate::cli::output::*;
use crate::Result;

fn workspace_or_default(app: &RagApp, workspace: Option<String>) -> String {
    workspace.unwrap_or_else(|| app.config.pipeline.default_workspace.clone())
}

pub async fn handle_cache_stats(app: &RagApp, workspace: Option<String>) -> Result<()> {
    let workspace = workspace_or_default(app, workspace);
    let Some(cache) = app.rag.cache() else {
        print_warning("Semantic cache is disabled");
        return Ok(());
    };

    let stats = cache.stats(&workspace).await;
    if !stats.available {
        print_warning(&format!("Cache backend '{}' is unreachable", stats.backend));
    }
    println!("💾 Cache ({}) for workspace '{}'", stats.backend, stats.workspace);
    println!("  exact entries:     {}", stats.exact_entries);
    println!("  embedding entries: {}", stats.embedding_entries);
    println!("  response entries:  {}", stats.response_entries);
    println!("  threshold:         {}", stats.similarity_threshold);
    println!("  ttl:               {}s", stats.ttl_secs);
    Ok(())
}

pub async fn handle_cache_invalidate(
    app: &RagApp,
    workspace: Option<String>,
    query: Option<String>,
) -> Result<()> {
    let workspace = workspace_or_default(app, workspace);
    let removed = app.rag.invalidate_cache(&workspace, query.as_deref()).await?;
    print_success(&format!(
        "Removed {removed} cache keys from workspace '{workspace}'"
    ));
    Ok(())
}
