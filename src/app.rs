//! Composition root: builds every service from one configuration

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::admission::AdmissionControl;
use crate::cache::CacheStore;
use crate::cache::MemoryStore;
use crate::cache::RedisStore;
use crate::cache::SemanticCache;
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::embeddings::EmbeddingClient;
use crate::errors::RagError;
use crate::errors::Result;
use crate::index::ChromaIndex;
use crate::index::MemoryIndex;
use crate::index::VectorIndex;
use crate::llm::Generator;
use crate::llm::OllamaClient;
use crate::rag::reranker;
use crate::rag::HybridRetriever;
use crate::rag::RagService;

/// The assembled application
#[derive(Clone)]
pub struct RagApp {
    pub config: Arc<AppConfig>,
    pub rag: RagService,
    pub admission: AdmissionControl,
}

impl RagApp {
    /// Connect the configured backends.
    ///
    /// Remote backends are reached lazily; nothing here waits on the network
    /// except loading a memory index seed file.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::from_config(&config.embeddings)?);
        let generator: Arc<dyn Generator> = Arc::new(OllamaClient::from_config(&config.llm)?);

        let index: Arc<dyn VectorIndex> = match config.index.backend.as_str() {
            "chroma" => Arc::new(ChromaIndex::from_config(&config.index)?),
            "memory" => {
                let index = MemoryIndex::new(config.index.collection.clone());
                if let Some(seed) = &config.index.seed_file {
                    index.load_jsonl(Path::new(seed), embedder.as_ref()).await?;
                }
                Arc::new(index)
            }
            other => {
                return Err(RagError::ConfigError(format!("Unknown index backend '{other}'")))
            }
        };

        let store: Option<Arc<dyn CacheStore>> = if config.cache.enabled {
            Some(match config.cache.backend.as_str() {
                "redis" => Arc::new(RedisStore::connect(&config.cache)?),
                "memory" => Arc::new(MemoryStore::new()),
                other => {
                    return Err(RagError::ConfigError(format!("Unknown cache backend '{other}'")))
                }
            })
        } else {
            None
        };

        Self::from_parts(config, embedder, generator, index, store)
    }

    /// Assemble from already-built collaborators
    pub fn from_parts(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        index: Arc<dyn VectorIndex>,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let reranker = reranker::from_config(&config.rerank)?;

        let cache = store
            .filter(|_| config.cache.enabled)
            .map(|store| {
                info!("Semantic cache backend: {}", store.name());
                Arc::new(SemanticCache::new(store, Arc::clone(&embedder), &config.cache))
            });
        let retriever = Arc::new(HybridRetriever::new(
            index,
            embedder,
            config.retrieval.clone(),
        ));

        let rag = RagService::new(Arc::clone(&config), cache, retriever, reranker, generator);
        let admission = AdmissionControl::from_config(&config.admission);

        Ok(Self {
            config,
            rag,
            admission,
        })
    }
}
