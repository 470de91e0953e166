//! ChromaDB REST (v1) client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::CollectionInfo;
use super::IndexHit;
use super::IndexRecord;
use super::VectorIndex;
use crate::config::IndexConfig;
use crate::errors::RagError;
use crate::errors::Result;
use crate::models::Metadata;

#[derive(Debug, Clone, Deserialize)]
struct Collection {
    id: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Metadata>>>,
}

/// A named ChromaDB collection reached over HTTP.
///
/// The collection id is resolved on first use and reused afterwards.
pub struct ChromaIndex {
    client: Client,
    endpoint: String,
    collection_name: String,
    collection: OnceCell<Collection>,
}

impl ChromaIndex {
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            collection_name: config.collection.clone(),
            collection: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.endpoint, path)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::IndexError(format!(
                "ChromaDB {what} failed ({status}): {error_text}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RagError::IndexError(format!("Failed to parse ChromaDB {what}: {e}")))
    }

    async fn collection(&self) -> Result<&Collection> {
        self.collection
            .get_or_try_init(|| async {
                let url = self.url(&format!("/collections/{}", self.collection_name));
                debug!("Resolving ChromaDB collection: {}", url);
                let response = self.client.get(&url).send().await?;
                let collection: Collection = Self::read_json(response, "collection lookup")
                    .await
                    .map_err(|e| {
                        RagError::IndexError(format!(
                            "Collection '{}' not found: {e}",
                            self.collection_name
                        ))
                    })?;
                info!(
                    "Using ChromaDB collection {} ({})",
                    self.collection_name, collection.id
                );
                Ok::<_, RagError>(collection)
            })
            .await
    }
}

/// Row `i` of a column that may be missing or short
fn column<T: Clone + Default>(column: Option<&Vec<Option<T>>>, i: usize) -> T {
    column
        .and_then(|c| c.get(i).cloned().flatten())
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<IndexHit>> {
        let collection = self.collection().await?;
        let url = self.url(&format!("/collections/{}/query", collection.id));

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": n_results,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;
        let result: QueryResponse = Self::read_json(response, "query").await?;

        let Some(ids) = result.ids.into_iter().next() else {
            return Ok(Vec::new());
        };
        let documents = result.documents.and_then(|d| d.into_iter().next());
        let metadatas = result.metadatas.and_then(|m| m.into_iter().next());
        let distances = result.distances.and_then(|d| d.into_iter().next());

        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| IndexHit {
                record: IndexRecord {
                    id,
                    text: column(documents.as_ref(), i),
                    metadata: column(metadatas.as_ref(), i),
                },
                distance: distances
                    .as_ref()
                    .and_then(|d| d.get(i).copied().flatten())
                    .unwrap_or(1.0),
            })
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<IndexRecord>> {
        let collection = self.collection().await?;
        let url = self.url(&format!("/collections/{}/get", collection.id));

        let response = self
            .client
            .post(&url)
            .json(&json!({ "include": ["documents", "metadatas"] }))
            .send()
            .await?;
        let result: GetResponse = Self::read_json(response, "get").await?;

        Ok(result
            .ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| IndexRecord {
                id,
                text: column(result.documents.as_ref(), i),
                metadata: column(result.metadatas.as_ref(), i),
            })
            .collect())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let collection = self.collection().await?;
        let url = self.url(&format!("/collections/{}/count", collection.id));
        let response = self.client.get(&url).send().await?;
        let count: usize = Self::read_json(response, "count").await?;

        Ok(CollectionInfo {
            backend: "chroma".to_string(),
            name: self.collection_name.clone(),
            count,
            metadata: collection.metadata.clone().unwrap_or_default(),
        })
    }

    async fn heartbeat(&self) -> bool {
        match self.client.get(self.url("/heartbeat")).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("ChromaDB heartbeat returned {}", response.status());
                false
            }
            Err(e) => {
                warn!("ChromaDB heartbeat failed: {}", e);
                false
            }
        }
    }
}
