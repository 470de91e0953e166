//! Document index: nearest-neighbor queries and full-corpus listing
//!
//! The retriever only needs four things from an index: a vector query,
//! the whole corpus (for BM25), a count and a liveness check.

pub mod chroma;
pub mod memory;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

pub use chroma::ChromaIndex;
pub use memory::MemoryIndex;

use crate::errors::Result;
use crate::models::Metadata;

/// A stored document without score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A nearest-neighbor result; lower distance is closer
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub record: IndexRecord,
    pub distance: f64,
}

/// Collection details reported by health and stats endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub backend: String,
    pub name: String,
    pub count: usize,
    pub metadata: Metadata,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The `n_results` records closest to `embedding`, nearest first
    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<IndexHit>>;

    /// Every record in the collection
    async fn list_all(&self) -> Result<Vec<IndexRecord>>;

    async fn collection_info(&self) -> Result<CollectionInfo>;

    async fn heartbeat(&self) -> bool;
}
