//! Semantic response cache
//!
//! Responses are stored under three keys sharing one TTL:
//!
//! - `cache:exact:{workspace}:{hash}`: the response, for exact repeats
//! - `cache:embedding:{workspace}:{hash}`: the query embedding
//! - `cache:response:{workspace}:{hash}`: the response, paired with the embedding
//!
//! where `hash = sha256("{workspace}:{query}")`. A lookup tries the exact key
//! first, then compares the query embedding against every stored embedding
//! of the workspace. That comparison is a linear scan; it is meant for
//! hundreds of live entries, not millions.
//!
//! The cache fails open: store or embedding errors are logged and counted,
//! and surface as a miss (or `false` / `0`), never as an error.

pub mod redis_store;
pub mod store;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use redis_store::RedisStore;
pub use store::CacheStore;
pub use store::MemoryStore;

use crate::config::CacheConfig;
use crate::embeddings::cosine_similarity;
use crate::embeddings::Embedder;
use crate::errors::RagError;
use crate::errors::Result;
use crate::models::ResponseEnvelope;

const EXACT_PREFIX: &str = "cache:exact";
const EMBEDDING_PREFIX: &str = "cache:embedding";
const RESPONSE_PREFIX: &str = "cache:response";

#[derive(Debug, Default)]
struct CacheCounters {
    exact_hits: AtomicU64,
    semantic_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// Entry counts for a workspace plus process-wide hit counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub workspace: String,
    pub backend: String,
    /// False when the store could not be queried; counts are then zero.
    pub available: bool,
    pub exact_entries: usize,
    pub embedding_entries: usize,
    pub response_entries: usize,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub similarity_threshold: f64,
    pub ttl_secs: u64,
}

pub struct SemanticCache {
    store: Arc<dyn CacheStore>,
    embedder: Arc<dyn Embedder>,
    similarity_threshold: f64,
    ttl: Duration,
    scan_count: usize,
    counters: CacheCounters,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn CacheStore>, embedder: Arc<dyn Embedder>, config: &CacheConfig) -> Self {
        info!(
            "Semantic cache on {} store: threshold={}, ttl={}s",
            store.name(),
            config.similarity_threshold,
            config.ttl_secs
        );
        Self {
            store,
            embedder,
            similarity_threshold: config.similarity_threshold,
            ttl: Duration::from_secs(config.ttl_secs),
            scan_count: config.scan_count,
            counters: CacheCounters::default(),
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// `sha256("{workspace}:{query}")`, hex encoded
    pub fn query_hash(query: &str, workspace: &str) -> String {
        hex::encode(Sha256::digest(format!("{workspace}:{query}").as_bytes()))
    }

    pub fn exact_key(query: &str, workspace: &str) -> String {
        format!("{EXACT_PREFIX}:{workspace}:{}", Self::query_hash(query, workspace))
    }

    pub fn embedding_key(query: &str, workspace: &str) -> String {
        format!("{EMBEDDING_PREFIX}:{workspace}:{}", Self::query_hash(query, workspace))
    }

    pub fn response_key(query: &str, workspace: &str) -> String {
        format!("{RESPONSE_PREFIX}:{workspace}:{}", Self::query_hash(query, workspace))
    }

    /// Look up a cached response, exact match first, then by similarity.
    pub async fn get(
        &self,
        query: &str,
        workspace: &str,
        use_semantic: bool,
    ) -> Option<ResponseEnvelope> {
        match self.lookup(query, workspace, use_semantic).await {
            Ok(Some(response)) => Some(response),
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for workspace {}", workspace);
                None
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!("Cache lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn lookup(
        &self,
        query: &str,
        workspace: &str,
        use_semantic: bool,
    ) -> Result<Option<ResponseEnvelope>> {
        if let Some(json) = self.store.get(&Self::exact_key(query, workspace)).await? {
            self.counters.exact_hits.fetch_add(1, Ordering::Relaxed);
            info!("Exact cache hit for workspace {}", workspace);
            return Ok(Some(serde_json::from_str(&json)?));
        }

        if !use_semantic {
            return Ok(None);
        }

        let query_embedding = self.embedder.embed(query).await?;
        let dimension = self.embedder.dimension();
        if query_embedding.len() != dimension {
            return Err(RagError::EmbeddingError(format!(
                "query embedding has {} dimensions, expected {dimension}",
                query_embedding.len()
            )));
        }

        let pattern = format!("{EMBEDDING_PREFIX}:{workspace}:*");
        let keys = self.store.scan(&pattern, self.scan_count).await?;

        let mut best: Option<(f64, String)> = None;
        for key in keys {
            // Entries can expire between SCAN and GET
            let Some(json) = self.store.get(&key).await? else {
                continue;
            };
            let cached: Vec<f32> = match serde_json::from_str(&json) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping unreadable cached embedding {}: {}", key, e);
                    continue;
                }
            };
            if cached.len() != dimension {
                debug!("Skipping cached embedding {} with {} dimensions", key, cached.len());
                continue;
            }

            let similarity = cosine_similarity(&query_embedding, &cached);
            if best.as_ref().map_or(true, |(score, _)| similarity > *score) {
                best = Some((similarity, key));
            }
        }

        let Some((similarity, key)) = best else {
            return Ok(None);
        };
        if similarity < self.similarity_threshold {
            debug!(
                "Best cached similarity {:.4} below threshold {}",
                similarity, self.similarity_threshold
            );
            return Ok(None);
        }

        let response_key = key.replacen(EMBEDDING_PREFIX, RESPONSE_PREFIX, 1);
        match self.store.get(&response_key).await? {
            Some(json) => {
                self.counters.semantic_hits.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Semantic cache hit for workspace {} (similarity {:.4})",
                    workspace, similarity
                );
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    /// Store a response under all three keys in one atomic write.
    ///
    /// When the query cannot be embedded, only the exact and response keys
    /// are written and the entry is reachable by exact match only.
    pub async fn set(&self, query: &str, workspace: &str, response: &ResponseEnvelope) -> bool {
        match self.store_entry(query, workspace, response).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                debug!("Cached response for workspace {}", workspace);
                true
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cache write failed: {}", e);
                false
            }
        }
    }

    async fn store_entry(
        &self,
        query: &str,
        workspace: &str,
        response: &ResponseEnvelope,
    ) -> Result<()> {
        let response_json = serde_json::to_string(response)?;
        let mut entries = vec![
            (Self::exact_key(query, workspace), response_json.clone()),
            (Self::response_key(query, workspace), response_json),
        ];

        match self.embedder.embed(query).await {
            Ok(embedding) if embedding.len() == self.embedder.dimension() => {
                entries.push((
                    Self::embedding_key(query, workspace),
                    serde_json::to_string(&embedding)?,
                ));
            }
            Ok(embedding) => warn!(
                "Not storing {}-dimensional embedding (expected {}); exact match only",
                embedding.len(),
                self.embedder.dimension()
            ),
            Err(e) => warn!("Could not embed query for cache, exact match only: {}", e),
        }

        self.store.set_many_ex(&entries, self.ttl).await
    }

    /// Remove one query's entry, or the whole workspace. Returns keys removed.
    pub async fn invalidate(&self, workspace: &str, query: Option<&str>) -> usize {
        let result = async {
            let keys = match query {
                Some(query) => vec![
                    Self::exact_key(query, workspace),
                    Self::embedding_key(query, workspace),
                    Self::response_key(query, workspace),
                ],
                None => {
                    let mut keys = Vec::new();
                    for prefix in [EXACT_PREFIX, EMBEDDING_PREFIX, RESPONSE_PREFIX] {
                        let pattern = format!("{prefix}:{workspace}:*");
                        keys.extend(self.store.scan(&pattern, self.scan_count).await?);
                    }
                    keys
                }
            };
            self.store.delete(&keys).await
        }
        .await;

        match result {
            Ok(removed) => {
                info!("Invalidated {} cache keys for workspace {}", removed, workspace);
                removed
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cache invalidation failed: {}", e);
                0
            }
        }
    }

    pub async fn stats(&self, workspace: &str) -> CacheStats {
        let exact_hits = self.counters.exact_hits.load(Ordering::Relaxed);
        let semantic_hits = self.counters.semantic_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = exact_hits + semantic_hits + misses;

        let mut stats = CacheStats {
            workspace: workspace.to_string(),
            backend: self.store.name().to_string(),
            exact_hits,
            semantic_hits,
            misses,
            writes: self.counters.writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (exact_hits + semantic_hits) as f64 / lookups as f64
            },
            similarity_threshold: self.similarity_threshold,
            ttl_secs: self.ttl.as_secs(),
            ..CacheStats::default()
        };

        let counts = async {
            let mut counts = [0usize; 3];
            for (slot, prefix) in [EXACT_PREFIX, EMBEDDING_PREFIX, RESPONSE_PREFIX]
                .iter()
                .enumerate()
            {
                let pattern = format!("{prefix}:{workspace}:*");
                counts[slot] = self.store.scan(&pattern, self.scan_count).await?.len();
            }
            Ok::<_, RagError>(counts)
        }
        .await;

        match counts {
            Ok([exact, embedding, response]) => {
                stats.available = true;
                stats.exact_entries = exact;
                stats.embedding_entries = embedding;
                stats.response_entries = response;
            }
            Err(e) => warn!("Cache stats unavailable: {}", e),
        }
        stats
    }

    pub async fn health_check(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache health check failed: {}", e);
                false
            }
        }
    }
}
