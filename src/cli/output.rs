//! CLI output formatting utilities

use crate::models::truncate_chars;
use crate::models::Document;
use crate::models::PipelineMetrics;
use crate::models::SourceDocument;

pub fn print_info(msg: &str) {
    println!("ℹ️  {msg}");
}

pub fn print_success(msg: &str) {
    println!("✅ {msg}");
}

pub fn print_warning(msg: &str) {
    println!("⚠️  {msg}");
}

pub fn print_error(msg: &str) {
    eprintln!("❌ {msg}");
}

/// Print the sources attached to an answer
pub fn print_sources(sources: &[SourceDocument]) {
    if sources.is_empty() {
        return;
    }
    println!("\n📚 Sources ({}):", sources.len());
    for (idx, source) in sources.iter().enumerate() {
        let origin = source
            .metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or(&source.id);
        println!(
            "  {}. {} (score: {:.4})\n     {}",
            idx + 1,
            origin,
            source.score,
            truncate_chars(&source.text, 100)
        );
    }
}

/// Print pipeline timings
pub fn print_metrics(metrics: &PipelineMetrics) {
    println!("\n⏱️  {}", if metrics.cached { "cached" } else { "fresh" });
    if let Some(cache_ms) = metrics.cache_time_ms {
        println!("  cache:      {cache_ms:.2} ms");
    }
    println!(
        "  retrieval:  {:.2} ms ({})",
        metrics.retrieval_time_ms, metrics.retrieval_method
    );
    println!("  rerank:     {:.2} ms", metrics.rerank_time_ms);
    println!("  generation: {:.2} ms", metrics.generation_time_ms);
    println!("  total:      {:.2} ms", metrics.total_time_ms);
    println!("  model:      {}", metrics.model);
}

/// Print ranked documents with their per-method annotations
pub fn print_documents(documents: &[Document]) {
    println!("Found {} documents:", documents.len());
    for (idx, doc) in documents.iter().enumerate() {
        let mut ranks = Vec::new();
        if let Some(rank) = doc.semantic_rank {
            ranks.push(format!("semantic #{rank}"));
        }
        if let Some(rank) = doc.bm25_rank {
            ranks.push(format!("bm25 #{rank}"));
        }
        println!(
            "  {}. [{}] score {:.4}{}",
            idx + 1,
            doc.id,
            doc.score,
            if ranks.is_empty() {
                String::new()
            } else {
                format!(" ({})", ranks.join(", "))
            }
        );
        println!("     {}", truncate_chars(&doc.text, 120));
    }
}
