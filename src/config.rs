use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::errors::RagError;

/// Environment variable prefix for overrides, e.g. `RAGSERVE__CACHE__TTL_SECS=600`.
pub const ENV_PREFIX: &str = "RAGSERVE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Deadline for a non-streaming query, including queue wait.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub backtrace: bool,
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            backtrace: true,
            dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum silence between two streamed chunks before the stream is failed.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

pub fn default_llm_model() -> String {
    "phi3:mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_stream_idle_timeout_secs() -> u64 {
    45
}

fn default_health_timeout_secs() -> u64 {
    5
}

pub fn default_temperature() -> f32 {
    0.7
}

pub fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// "ollama" or "openai"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            model: "nomic-embed-text:latest".to_string(),
            dimension: 768,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// "chroma" or "memory"
    #[serde(default = "default_index_backend")]
    pub backend: String,
    pub endpoint: String,
    pub collection: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
    /// JSON Lines file loaded into the memory backend at startup
    #[serde(default)]
    pub seed_file: Option<String>,
}

fn default_index_backend() -> String {
    "chroma".to_string()
}

fn default_index_timeout_secs() -> u64 {
    30
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            endpoint: "http://localhost:8001".to_string(),
            collection: "documents".to_string(),
            timeout_secs: default_index_timeout_secs(),
            seed_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "redis" or "memory"
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    pub url: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// SCAN batch size hint for the semantic lookup.
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
    /// Per-command deadline; a slow store degrades to a miss.
    #[serde(default = "default_cache_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_cache_backend() -> String {
    "redis".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_similarity_threshold() -> f64 {
    0.95
}

fn default_scan_count() -> usize {
    100
}

fn default_cache_timeout_ms() -> u64 {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_cache_backend(),
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: String::new(),
            ttl_secs: default_cache_ttl_secs(),
            similarity_threshold: default_similarity_threshold(),
            scan_count: default_scan_count(),
            timeout_ms: default_cache_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_half")]
    pub semantic_weight: f64,
    #[serde(default = "default_half")]
    pub bm25_weight: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    #[serde(default = "default_bm25_epsilon")]
    pub bm25_epsilon: f64,
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_half() -> f64 {
    0.5
}

fn default_candidate_multiplier() -> usize {
    2
}

fn default_max_candidates() -> usize {
    50
}

fn default_bm25_k1() -> f64 {
    1.5
}

fn default_bm25_b() -> f64 {
    0.75
}

fn default_bm25_epsilon() -> f64 {
    0.25
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            semantic_weight: default_half(),
            bm25_weight: default_half(),
            candidate_multiplier: default_candidate_multiplier(),
            max_candidates: default_max_candidates(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            bm25_epsilon: default_bm25_epsilon(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rerank_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub min_score: f64,
}

fn default_rerank_strategy() -> String {
    "score-based".to_string()
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: default_rerank_strategy(),
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workspace")]
    pub default_workspace: String,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default)]
    pub min_score: f64,
    /// Context window per model, in tokens.
    #[serde(default = "default_context_limits")]
    pub context_limits: Vec<ModelContextLimit>,
    #[serde(default = "default_context_tokens")]
    pub default_context_tokens: usize,
}

pub fn default_workspace() -> String {
    "greenfrog".to_string()
}

pub fn default_k() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelContextLimit {
    pub model: String,
    pub tokens: usize,
}

fn default_context_limits() -> Vec<ModelContextLimit> {
    vec![
        ModelContextLimit {
            model: "phi3:mini".to_string(),
            tokens: 4096,
        },
        ModelContextLimit {
            model: "llama3.2:3b".to_string(),
            tokens: 8192,
        },
    ]
}

fn default_context_tokens() -> usize {
    4096
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_workspace: default_workspace(),
            default_k: default_k(),
            min_score: 0.0,
            context_limits: default_context_limits(),
            default_context_tokens: default_context_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_queue_depth() -> usize {
    10
}

fn default_retry_after_secs() -> u64 {
    5
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_depth: default_max_queue_depth(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, layered as
    /// built-in defaults < `config.toml` < `RAGSERVE__*` environment variables.
    pub fn load() -> crate::Result<Self> {
        Self::load_from(None::<&Path>)
    }

    /// Same layering as [`AppConfig::load`] but with an explicit file.
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> crate::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                let path = path.as_ref();
                if !path.exists() {
                    return Err(RagError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("Config file not found: {}", path.display()),
                    )));
                }
                builder = builder.add_source(config::File::from(path));
            }
            None => {
                if Path::new("config.toml").exists() {
                    builder = builder.add_source(config::File::with_name("config.toml"));
                }
            }
        }

        let config: AppConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component misbehave at runtime.
    pub fn validate(&self) -> crate::Result<()> {
        for (name, endpoint) in [
            ("llm.endpoint", &self.llm.endpoint),
            ("embeddings.endpoint", &self.embeddings.endpoint),
        ] {
            url::Url::parse(endpoint)
                .map_err(|e| RagError::ConfigError(format!("{name} '{endpoint}': {e}")))?;
        }
        if self.index.backend == "chroma" {
            url::Url::parse(&self.index.endpoint).map_err(|e| {
                RagError::ConfigError(format!("index.endpoint '{}': {e}", self.index.endpoint))
            })?;
        }
        if !matches!(self.index.backend.as_str(), "chroma" | "memory") {
            return Err(RagError::ConfigError(format!(
                "index.backend must be 'chroma' or 'memory', got '{}'",
                self.index.backend
            )));
        }
        if !matches!(self.cache.backend.as_str(), "redis" | "memory") {
            return Err(RagError::ConfigError(format!(
                "cache.backend must be 'redis' or 'memory', got '{}'",
                self.cache.backend
            )));
        }
        if !matches!(self.embeddings.provider.as_str(), "ollama" | "openai") {
            return Err(RagError::ConfigError(format!(
                "embeddings.provider must be 'ollama' or 'openai', got '{}'",
                self.embeddings.provider
            )));
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "cache.similarity_threshold must be within [0, 1], got {}",
                self.cache.similarity_threshold
            )));
        }
        if self.embeddings.dimension == 0 {
            return Err(RagError::ConfigError(
                "embeddings.dimension must be positive".to_string(),
            ));
        }
        if self.admission.max_concurrent == 0 {
            return Err(RagError::ConfigError(
                "admission.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.retrieval.rrf_k <= 0.0 || !self.retrieval.rrf_k.is_finite() {
            return Err(RagError::ConfigError(format!(
                "retrieval.rrf_k must be a positive number, got {}",
                self.retrieval.rrf_k
            )));
        }
        if self.retrieval.candidate_multiplier == 0 || self.retrieval.max_candidates == 0 {
            return Err(RagError::ConfigError(
                "retrieval candidate limits must be positive".to_string(),
            ));
        }
        if self.pipeline.default_k == 0 {
            return Err(RagError::ConfigError(
                "pipeline.default_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Get embedding dimension
    pub fn embedding_dimension(&self) -> usize {
        self.embeddings.dimension
    }

    /// Get embedding model name
    pub fn embedding_model(&self) -> &str {
        &self.embeddings.model
    }

    /// Get generation model name
    pub fn llm_model(&self) -> &str {
        &self.llm.model
    }

    /// Context window in tokens for a model, falling back to the configured default.
    pub fn context_limit(&self, model: &str) -> usize {
        self.pipeline
            .context_limits
            .iter()
            .find(|limit| limit.model == model)
            .map_or(self.pipeline.default_context_tokens, |limit| limit.tokens)
    }
}
