//! RAG (Retrieval-Augmented Generation) module
//!
//! This module sequences one question through the pipeline:
//! - Semantic cache lookup
//! - Hybrid retrieval (vector + BM25, fused with Reciprocal Rank Fusion)
//! - Reranking
//! - Context assembly and prompt construction
//! - Generation, streamed or in one response
//!
//! # Examples
//!
//! ```rust,no_run
//! use ragserve::app::RagApp;
//! use ragserve::config::AppConfig;
//! use ragserve::rag::QueryOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let app = RagApp::from_config(config).await?;
//!
//!     let response = app
//!         .rag
//!         .query("How do I reset my password?", &QueryOptions::default())
//!         .await?;
//!     println!("Answer: {}", response.answer);
//!     println!("Sources: {} documents", response.sources.len());
//!
//!     Ok(())
//! }
//! ```

pub mod bm25;
pub mod context;
pub mod pipeline;
pub mod prompts;
pub mod reranker;
pub mod retriever;

pub use context::ContextAssembler;
pub use pipeline::HealthReport;
pub use pipeline::PipelineStats;
pub use pipeline::QueryOptions;
pub use pipeline::RagService;
pub use reranker::Reranker;
pub use reranker::ScoreReranker;
pub use retriever::reciprocal_rank_fusion;
pub use retriever::HybridOptions;
pub use retriever::HybridRetriever;
pub use retriever::RetrievalOutcome;
