//! Result reranking

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tracing::warn;

use crate::config::RerankConfig;
use crate::errors::RagError;
use crate::errors::Result;
use crate::models::Document;

pub const SCORE_BASED: &str = "score-based";

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `documents` for `query`, keeping at most `top_k` with
    /// `score >= min_score`.
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<Document>,
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<Document>>;

    fn name(&self) -> &'static str;

    async fn health_check(&self) -> bool;
}

/// Reject documents without an id or with a non-finite score.
///
/// Scores outside `[0, 1]` are legal (BM25 and RRF are unbounded) and only logged.
pub fn validate_documents(documents: &[Document]) -> Result<()> {
    for (index, doc) in documents.iter().enumerate() {
        if doc.id.trim().is_empty() {
            return Err(RagError::MalformedDocument {
                index,
                reason: "missing id".to_string(),
            });
        }
        if !doc.score.is_finite() {
            return Err(RagError::MalformedDocument {
                index,
                reason: format!("non-finite score {}", doc.score),
            });
        }
        if !(0.0..=1.0).contains(&doc.score) {
            warn!("Document {} has score {} outside [0, 1]", doc.id, doc.score);
        }
    }
    Ok(())
}

/// Filter by score floor, then sort by score.
///
/// Hybrid results arrive already ordered by their fused RRF score, which is
/// also their `score`, so on pipeline input this strategy only applies the
/// floor and the `top_k` cut; the order is unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoreReranker;

#[async_trait]
impl Reranker for ScoreReranker {
    async fn rerank(
        &self,
        _query: &str,
        documents: Vec<Document>,
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<Document>> {
        if documents.is_empty() {
            return Ok(documents);
        }
        validate_documents(&documents)?;

        let before = documents.len();
        let mut kept: Vec<Document> = documents
            .into_iter()
            .filter(|doc| doc.score >= min_score)
            .collect();
        kept.sort_by(|a, b| b.score.total_cmp(&a.score));
        kept.truncate(top_k);

        debug!("Reranked {} -> {} documents", before, kept.len());
        Ok(kept)
    }

    fn name(&self) -> &'static str {
        SCORE_BASED
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Build the configured reranker
pub fn from_config(config: &RerankConfig) -> Result<Arc<dyn Reranker>> {
    match config.strategy.as_str() {
        SCORE_BASED => Ok(Arc::new(ScoreReranker)),
        other => Err(RagError::ConfigError(format!(
            "Unknown rerank strategy '{other}' (expected '{SCORE_BASED}')"
        ))),
    }
}
