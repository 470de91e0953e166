//! Shared fixtures: deterministic embedder and generator, seeded memory index

#![allow(dead_code)]

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use ragserve::app::RagApp;
use ragserve::cache::CacheStore;
use ragserve::cache::MemoryStore;
use ragserve::embeddings::Embedder;
use ragserve::index::IndexRecord;
use ragserve::index::MemoryIndex;
use ragserve::llm::GenerationRequest;
use ragserve::llm::Generator;
use ragserve::llm::StreamingResponse;
use ragserve::AppConfig;
use ragserve::RagError;
use ragserve::Result;

const VOCABULARY: [&str; 5] = ["rust", "async", "python", "cache", "tokio"];

/// Bag-of-words over a fixed vocabulary, so similarity is predictable
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(VOCABULARY
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect())
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    fn model(&self) -> &str {
        "keyword-test"
    }
}

/// Embedding backend that is always down
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::EmbeddingError("connection refused".to_string()))
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    fn model(&self) -> &str {
        "down"
    }
}

/// How a [`ScriptedGenerator`] behaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Script {
    /// Answers normally; streams [`STREAM_CHUNKS`]
    #[default]
    Answer,
    /// Every call fails
    Fail,
    /// Answers with an empty string; streams nothing
    Empty,
    /// `generate` sleeps this long first; streams one chunk then stalls
    Slow(Duration),
}

/// Counts calls and plays a [`Script`]
#[derive(Default)]
pub struct ScriptedGenerator {
    pub calls: AtomicUsize,
    pub script: Script,
}

pub const STREAM_CHUNKS: [&str; 4] = ["Rust ", "", "is ", "fast."];

impl ScriptedGenerator {
    pub fn with_script(script: Script) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script,
        }
    }

    pub fn failing() -> Self {
        Self::with_script(Script::Fail)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn unavailable() -> RagError {
    RagError::LlmError("model server unavailable".to_string())
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Fail => Err(unavailable()),
            Script::Empty => Ok(String::new()),
            Script::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok("late".to_string())
            }
            Script::Answer => Ok(format!("Answer using {} prompt chars", request.prompt.len())),
        }
    }

    async fn generate_stream(&self, _request: &GenerationRequest) -> Result<StreamingResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<Result<String>> = match self.script {
            Script::Fail => return Err(unavailable()),
            Script::Empty => Vec::new(),
            Script::Slow(_) => {
                let first = futures::stream::iter(vec![Ok("Rust ".to_string())]);
                return Ok(StreamingResponse::new(Box::pin(
                    first.chain(futures::stream::pending()),
                )));
            }
            Script::Answer => STREAM_CHUNKS.iter().map(|c| Ok(c.to_string())).collect(),
        };
        Ok(StreamingResponse::new(Box::pin(futures::stream::iter(chunks))))
    }

    async fn health_check(&self) -> bool {
        self.script != Script::Fail
    }
}

pub fn corpus() -> Vec<IndexRecord> {
    [
        ("doc-rust", "Rust async programming with tokio runtimes"),
        ("doc-python", "Python asyncio event loops and coroutines"),
        ("doc-cache", "Semantic cache lookups keyed by embeddings"),
        ("doc-tokio", "Tokio tasks are cheap async units of work in Rust"),
    ]
    .into_iter()
    .map(|(id, text)| {
        let mut metadata = ragserve::models::Metadata::new();
        metadata.insert("source".to_string(), serde_json::json!(format!("{id}.md")));
        IndexRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
        }
    })
    .collect()
}

/// Index vectors always come from [`KeywordEmbedder`], whatever embedder the
/// app under test queries with.
pub async fn seeded_index(records: Vec<IndexRecord>) -> Result<MemoryIndex> {
    let index = MemoryIndex::new("test-docs");
    for record in records {
        let vector = KeywordEmbedder.embed(&record.text).await?;
        index.upsert(record, vector)?;
    }
    Ok(index)
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.backend = "memory".to_string();
    config.index.backend = "memory".to_string();
    config.llm.model = "test-model".to_string();
    config
}

pub struct TestApp {
    pub app: RagApp,
    pub generator: Arc<ScriptedGenerator>,
    pub store: Arc<MemoryStore>,
}

pub async fn build_app(config: AppConfig, records: Vec<IndexRecord>) -> Result<TestApp> {
    build_app_with(config, records, Arc::new(KeywordEmbedder), ScriptedGenerator::default()).await
}

pub async fn build_app_with(
    config: AppConfig,
    records: Vec<IndexRecord>,
    embedder: Arc<dyn Embedder>,
    generator: ScriptedGenerator,
) -> Result<TestApp> {
    let index = seeded_index(records).await?;
    let generator = Arc::new(generator);
    let store = Arc::new(MemoryStore::new());

    let app = RagApp::from_parts(
        config,
        embedder,
        Arc::clone(&generator) as Arc<dyn Generator>,
        Arc::new(index),
        Some(Arc::clone(&store) as Arc<dyn CacheStore>),
    )?;
    Ok(TestApp {
        app,
        generator,
        store,
    })
}
