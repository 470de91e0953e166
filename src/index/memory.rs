//! In-memory [`VectorIndex`] for local runs and tests.
//!
//! Vector search is brute-force squared L2 over all stored vectors, the
//! same distance ChromaDB uses by default.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use super::CollectionInfo;
use super::IndexHit;
use super::IndexRecord;
use super::VectorIndex;
use crate::embeddings::Embedder;
use crate::errors::RagError;
use crate::errors::Result;

struct StoredRecord {
    record: IndexRecord,
    vector: Vec<f32>,
}

pub struct MemoryIndex {
    name: String,
    records: RwLock<Vec<StoredRecord>>,
}

fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

impl MemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Add or replace a record by id
    pub fn upsert(&self, record: IndexRecord, vector: Vec<f32>) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RagError::IndexError("memory index lock poisoned".to_string()))?;
        records.retain(|stored| stored.record.id != record.id);
        records.push(StoredRecord { record, vector });
        Ok(())
    }

    /// Load records from a JSON Lines file (`{"id", "text", "metadata"}` per
    /// line), embedding each text with `embedder`.
    pub async fn load_jsonl(&self, path: &Path, embedder: &dyn Embedder) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut loaded = 0;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: IndexRecord = serde_json::from_str(line).map_err(|e| {
                RagError::IndexError(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
            let vector = embedder.embed(&record.text).await?;
            self.upsert(record, vector)?;
            loaded += 1;
        }
        info!("Loaded {} records into memory index from {}", loaded, path.display());
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.records.read().map_or(0, |records| records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<IndexHit>> {
        let records = self
            .records
            .read()
            .map_err(|_| RagError::IndexError("memory index lock poisoned".to_string()))?;

        let mut hits: Vec<IndexHit> = records
            .iter()
            .filter(|stored| stored.vector.len() == embedding.len())
            .map(|stored| IndexHit {
                record: stored.record.clone(),
                distance: squared_l2(&stored.vector, embedding),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn list_all(&self) -> Result<Vec<IndexRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| RagError::IndexError("memory index lock poisoned".to_string()))?;
        Ok(records.iter().map(|stored| stored.record.clone()).collect())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        Ok(CollectionInfo {
            backend: "memory".to_string(),
            name: self.name.clone(),
            count: self.len(),
            metadata: Default::default(),
        })
    }

    async fn heartbeat(&self) -> bool {
        true
    }
}
