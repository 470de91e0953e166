//! RAG (Retrieval-Augmented Generation) handlers

use std::io::Write;

use futures::StreamExt;

use crate::app::RagApp;
use crate::cli::commands::SearchMode;
use crate::cli::output::*;
use crate::llm::StreamFrame;
use crate::rag::HybridOptions;
use crate::rag::QueryOptions;
use crate::Result;

/// Options for `ragserve ask`
#[derive(Debug, Clone, Default)]
pub struct AskArgs {
    pub workspace: Option<String>,
    pub k: Option<usize>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub no_cache: bool,
    pub no_rerank: bool,
    pub json: bool,
}

impl AskArgs {
    fn to_options(&self, defaults: QueryOptions) -> QueryOptions {
        QueryOptions {
            workspace: self.workspace.clone().unwrap_or(defaults.workspace),
            k: self.k.unwrap_or(defaults.k),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            model: self.model.clone(),
            use_cache: self.no_cache.then_some(false),
            use_rerank: self.no_rerank.then_some(false),
            ..defaults
        }
    }
}

pub async fn handle_ask(app: &RagApp, question: String, args: AskArgs) -> Result<()> {
    let options = args.to_options(QueryOptions::from_config(&app.config));

    if !args.stream {
        let response = app.rag.query(&question, &options).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(());
        }
        println!("\n💬 {}", response.answer);
        print_sources(&response.sources);
        print_metrics(&response.metadata);
        return Ok(());
    }

    let mut frames = app.rag.query_stream(&question, &options)?;
    let mut stdout = std::io::stdout();
    println!();
    while let Some(frame) = frames.next().await {
        match frame {
            StreamFrame::Token { token, .. } => {
                print!("{token}");
                stdout.flush()?;
            }
            StreamFrame::Complete {
                stats,
                sources,
                metadata,
                ..
            } => {
                println!();
                if let Some(sources) = sources {
                    print_sources(&sources);
                }
                if let Some(metadata) = metadata {
                    print_metrics(&metadata);
                }
                println!(
                    "  tokens:     {} ({:.2}/s)",
                    stats.metrics.token_count, stats.metrics.tokens_per_second
                );
            }
            StreamFrame::Error { error, .. } => {
                println!();
                print_error(&error);
            }
        }
    }
    Ok(())
}

pub async fn handle_search(app: &RagApp, query: String, k: usize, method: SearchMode) -> Result<()> {
    let retriever = app.rag.retriever();
    print_info(&format!("Searching ({method:?}): \"{query}\""));

    let documents = match method {
        SearchMode::Semantic => retriever.semantic_search(&query, k).await?,
        SearchMode::Bm25 => retriever.keyword_search(&query, k).await?,
        SearchMode::Hybrid => {
            let options = HybridOptions::from_config(retriever.config(), k);
            let outcome = retriever.retrieve(&query, &options).await;
            if outcome.is_degraded() {
                print_warning("One search method failed; showing partial results");
            }
            outcome.into_result()?
        }
    };

    if documents.is_empty() {
        print_warning("No matching documents");
        return Ok(());
    }
    print_documents(&documents);
    Ok(())
}

pub async fn handle_reload(app: &RagApp) -> Result<()> {
    let count = app.rag.reload_documents().await?;
    print_success(&format!("Keyword corpus reloaded: {count} documents"));
    Ok(())
}
