//! Hybrid retrieval: vector search and BM25 fused with Reciprocal Rank Fusion

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::bm25::tokenize;
use super::bm25::Bm25Index;
use super::bm25::Bm25Params;
use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::errors::RagError;
use crate::errors::Result;
use crate::index::CollectionInfo;
use crate::index::IndexRecord;
use crate::index::VectorIndex;
use crate::models::Document;
use crate::models::SearchMethod;

/// Per-call fusion parameters
#[derive(Debug, Clone, Copy)]
pub struct HybridOptions {
    pub k: usize,
    pub rrf_k: f64,
    pub semantic_weight: f64,
    pub bm25_weight: f64,
    /// Drop fused documents below this RRF score; ignored when `<= 0`
    pub min_score: f64,
}

impl HybridOptions {
    pub fn from_config(config: &RetrievalConfig, k: usize) -> Self {
        Self {
            k,
            rrf_k: config.rrf_k,
            semantic_weight: config.semantic_weight,
            bm25_weight: config.bm25_weight,
            min_score: 0.0,
        }
    }

    #[must_use]
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

/// Result of running both sub-searches.
///
/// One failed sub-search degrades the result instead of failing it.
#[derive(Debug)]
pub enum RetrievalOutcome {
    Complete(Vec<Document>),
    Partial {
        documents: Vec<Document>,
        failed_method: SearchMethod,
        error: String,
    },
    Failed {
        semantic_error: String,
        bm25_error: String,
    },
}

impl RetrievalOutcome {
    pub fn documents(&self) -> &[Document] {
        match self {
            Self::Complete(documents) | Self::Partial { documents, .. } => documents,
            Self::Failed { .. } => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Complete(_))
    }

    pub fn into_result(self) -> Result<Vec<Document>> {
        match self {
            Self::Complete(documents) | Self::Partial { documents, .. } => Ok(documents),
            Self::Failed {
                semantic_error,
                bm25_error,
            } => Err(RagError::RetrievalFailed(format!(
                "both searches failed (semantic: {semantic_error}; bm25: {bm25_error})"
            ))),
        }
    }
}

/// Fuse two ranked lists with weighted Reciprocal Rank Fusion.
///
/// A document at 1-indexed rank `r` in a list contributes `weight / (rrf_k + r)`;
/// contributions are summed per document id. Each fused document carries
/// `rrf_score` (also copied into `score`) and the per-list score and rank
/// annotations. Ties keep first-seen order, semantic list first.
pub fn reciprocal_rank_fusion(
    semantic: Vec<Document>,
    bm25: Vec<Document>,
    rrf_k: f64,
    weights: (f64, f64),
) -> Vec<Document> {
    let (semantic_weight, bm25_weight) = weights;
    let mut fused: Vec<Document> = Vec::with_capacity(semantic.len() + bm25.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(fused.capacity());

    for (rank, doc) in semantic.into_iter().enumerate() {
        let rank = rank + 1;
        let contribution = semantic_weight / (rrf_k + rank as f64);
        match positions.get(&doc.id) {
            Some(&pos) => {
                let existing = &mut fused[pos];
                existing.rrf_score = Some(existing.rrf_score.unwrap_or(0.0) + contribution);
            }
            None => {
                positions.insert(doc.id.clone(), fused.len());
                let mut doc = doc;
                doc.semantic_score = Some(doc.score);
                doc.semantic_rank = Some(rank);
                doc.rrf_score = Some(contribution);
                fused.push(doc);
            }
        }
    }

    for (rank, doc) in bm25.into_iter().enumerate() {
        let rank = rank + 1;
        let contribution = bm25_weight / (rrf_k + rank as f64);
        let bm25_score = doc.score;
        let pos = match positions.get(&doc.id) {
            Some(&pos) => {
                let existing = &mut fused[pos];
                existing.rrf_score = Some(existing.rrf_score.unwrap_or(0.0) + contribution);
                pos
            }
            None => {
                let pos = fused.len();
                positions.insert(doc.id.clone(), pos);
                let mut doc = doc;
                doc.rrf_score = Some(contribution);
                fused.push(doc);
                pos
            }
        };
        fused[pos].bm25_score = Some(bm25_score);
        fused[pos].bm25_rank = Some(rank);
    }

    for doc in &mut fused {
        doc.score = doc.rrf_score.unwrap_or(0.0);
        doc.method = Some(SearchMethod::Hybrid);
    }

    // Stable: equal scores keep insertion order
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

/// The in-memory keyword corpus; replaced wholesale on reload
struct KeywordCorpus {
    records: Vec<IndexRecord>,
    index: Bm25Index,
}

impl KeywordCorpus {
    fn build(records: Vec<IndexRecord>, params: Bm25Params) -> Self {
        let tokenized: Vec<Vec<String>> = records.iter().map(|r| tokenize(&r.text)).collect();
        let index = Bm25Index::new(&tokenized, params);
        Self { records, index }
    }
}

/// Collection details plus keyword corpus state
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalInfo {
    pub collection: CollectionInfo,
    /// `None` until the corpus has been loaded
    pub keyword_corpus_size: Option<usize>,
}

pub struct HybridRetriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    corpus: RwLock<Option<Arc<KeywordCorpus>>>,
    load_lock: Mutex<()>,
}

impl HybridRetriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
            corpus: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Candidates fetched from each sub-search for a final list of `k`
    pub fn candidate_count(&self, k: usize) -> usize {
        k.saturating_mul(self.config.candidate_multiplier)
            .min(self.config.max_candidates)
    }

    /// Load the keyword corpus from the index, returning its size.
    ///
    /// Without `force`, an already-loaded corpus is kept. Concurrent callers
    /// share one load; readers keep using the previous corpus until the new
    /// one is published.
    pub async fn load_documents(&self, force: bool) -> Result<usize> {
        if !force {
            if let Some(corpus) = self.corpus.read().await.as_ref() {
                return Ok(corpus.records.len());
            }
        }

        let _loading = self.load_lock.lock().await;
        if !force {
            if let Some(corpus) = self.corpus.read().await.as_ref() {
                return Ok(corpus.records.len());
            }
        }

        info!("Loading keyword corpus from index");
        let records = self.index.list_all().await?;
        if records.is_empty() {
            warn!("Index returned no documents; keyword search will be empty");
        }
        let corpus = Arc::new(KeywordCorpus::build(records, Bm25Params::from(&self.config)));
        let count = corpus.records.len();
        *self.corpus.write().await = Some(corpus);

        info!("Keyword corpus loaded: {} documents", count);
        Ok(count)
    }

    async fn keyword_corpus(&self) -> Result<Arc<KeywordCorpus>> {
        if let Some(corpus) = self.corpus.read().await.as_ref() {
            return Ok(Arc::clone(corpus));
        }
        self.load_documents(false).await?;
        self.corpus
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| RagError::IndexError("keyword corpus unavailable".to_string()))
    }

    /// Vector search; similarity is `1 / (1 + distance)`
    pub async fn semantic_search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        debug!("Performing semantic search: k={}", k);
        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.query(&embedding, k).await?;

        let results: Vec<Document> = hits
            .into_iter()
            .map(|hit| {
                let mut doc = Document::new(hit.record.id, hit.record.text, 1.0 / (1.0 + hit.distance))
                    .with_metadata(hit.record.metadata)
                    .with_method(SearchMethod::Semantic);
                doc.distance = Some(hit.distance);
                doc
            })
            .collect();
        debug!("Semantic search returned {} results", results.len());
        Ok(results)
    }

    /// BM25 search over the keyword corpus; only positive scores are returned
    pub async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        debug!("Performing keyword search: k={}", k);
        let corpus = self.keyword_corpus().await?;

        let results: Vec<Document> = corpus
            .index
            .top_k(&tokenize(query), k)
            .into_iter()
            .map(|(i, score)| {
                let record = &corpus.records[i];
                Document::new(record.id.clone(), record.text.clone(), score)
                    .with_metadata(record.metadata.clone())
                    .with_method(SearchMethod::Bm25)
            })
            .collect();
        debug!("Keyword search returned {} results", results.len());
        Ok(results)
    }

    /// Run both sub-searches concurrently and fuse what succeeded.
    #[instrument(name = "ragserve::hybrid_retrieve", skip(self, query), fields(k = options.k))]
    pub async fn retrieve(&self, query: &str, options: &HybridOptions) -> RetrievalOutcome {
        let candidates = self.candidate_count(options.k);
        let (semantic, bm25) = tokio::join!(
            self.semantic_search(query, candidates),
            self.keyword_search(query, candidates)
        );

        let fuse = |semantic: Vec<Document>, bm25: Vec<Document>| {
            let fused = reciprocal_rank_fusion(
                semantic,
                bm25,
                options.rrf_k,
                (options.semantic_weight, options.bm25_weight),
            );
            finalize(fused, options)
        };

        match (semantic, bm25) {
            (Ok(semantic), Ok(bm25)) => {
                info!(
                    "Hybrid search: {} semantic + {} bm25 candidates",
                    semantic.len(),
                    bm25.len()
                );
                RetrievalOutcome::Complete(fuse(semantic, bm25))
            }
            (Ok(semantic), Err(e)) => {
                error!("BM25 search failed, continuing with semantic results: {}", e);
                RetrievalOutcome::Partial {
                    documents: fuse(semantic, Vec::new()),
                    failed_method: SearchMethod::Bm25,
                    error: e.to_string(),
                }
            }
            (Err(e), Ok(bm25)) => {
                error!("Semantic search failed, continuing with BM25 results: {}", e);
                RetrievalOutcome::Partial {
                    documents: fuse(Vec::new(), bm25),
                    failed_method: SearchMethod::Semantic,
                    error: e.to_string(),
                }
            }
            (Err(semantic_error), Err(bm25_error)) => {
                error!(
                    "Both searches failed: semantic: {}; bm25: {}",
                    semantic_error, bm25_error
                );
                RetrievalOutcome::Failed {
                    semantic_error: semantic_error.to_string(),
                    bm25_error: bm25_error.to_string(),
                }
            }
        }
    }

    /// Hybrid search returning up to `options.k` fused documents
    ///
    /// # Errors
    /// - `RetrievalFailed` when both sub-searches fail
    pub async fn hybrid_search(&self, query: &str, options: &HybridOptions) -> Result<Vec<Document>> {
        self.retrieve(query, options).await.into_result()
    }

    pub async fn collection_info(&self) -> Result<RetrievalInfo> {
        let collection = self.index.collection_info().await?;
        let keyword_corpus_size = self
            .corpus
            .read()
            .await
            .as_ref()
            .map(|corpus| corpus.records.len());
        Ok(RetrievalInfo {
            collection,
            keyword_corpus_size,
        })
    }

    /// Index reachable and keyword corpus loadable
    pub async fn health_check(&self) -> bool {
        if !self.index.heartbeat().await {
            return false;
        }
        match self.load_documents(false).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Retrieval health check failed: {}", e);
                false
            }
        }
    }
}

/// Apply the score floor and the final cut
fn finalize(mut fused: Vec<Document>, options: &HybridOptions) -> Vec<Document> {
    if options.min_score > 0.0 {
        fused.retain(|doc| doc.rrf_score.unwrap_or(0.0) >= options.min_score);
    }
    fused.truncate(options.k);
    fused
}
