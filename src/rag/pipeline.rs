//! Complete RAG pipeline: Cache -> Retrieve -> Rerank -> Generate -> Cache

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::context::ContextAssembler;
use super::prompts::build_rag_prompt;
use super::prompts::NO_CONTEXT_ANSWER;
use super::prompts::SYSTEM_PROMPT;
use super::reranker::Reranker;
use super::retriever::HybridOptions;
use super::retriever::HybridRetriever;
use super::retriever::RetrievalInfo;
use super::retriever::RetrievalOutcome;
use crate::cache::CacheStats;
use crate::cache::SemanticCache;
use crate::config::AppConfig;
use crate::errors::RagError;
use crate::errors::Result;
use crate::llm::streaming::stream_response;
use crate::llm::streaming::FrameStream;
use crate::llm::streaming::StreamMetrics;
use crate::llm::streaming::StreamStats;
use crate::llm::GenerationRequest;
use crate::llm::Generator;
use crate::llm::StreamFrame;
use crate::models::elapsed_ms;
use crate::models::Document;
use crate::models::PipelineMetrics;
use crate::models::ResponseEnvelope;
use crate::models::SearchMethod;

/// Per-call overrides; `None` falls back to the pipeline defaults
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub workspace: String,
    pub k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub min_score: f64,
    pub model: Option<String>,
    pub use_cache: Option<bool>,
    pub use_rerank: Option<bool>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            workspace: crate::config::default_workspace(),
            k: crate::config::default_k(),
            temperature: crate::config::default_temperature(),
            max_tokens: crate::config::default_max_tokens(),
            min_score: 0.0,
            model: None,
            use_cache: None,
            use_rerank: None,
        }
    }
}

impl QueryOptions {
    /// Defaults taken from a loaded configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workspace: config.pipeline.default_workspace.clone(),
            k: config.pipeline.default_k,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            min_score: config.pipeline.min_score,
            ..Self::default()
        }
    }
}

/// Workspace names end up inside cache key patterns, so they are restricted
/// to `[A-Za-z0-9_-]`.
pub fn validate_workspace(workspace: &str) -> Result<()> {
    if workspace.is_empty() {
        return Err(RagError::Validation("Workspace cannot be empty".to_string()));
    }
    if !workspace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RagError::Validation(format!(
            "Invalid workspace '{workspace}': use letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

/// Options after defaults are applied
#[derive(Debug, Clone)]
struct ResolvedOptions {
    workspace: String,
    k: usize,
    temperature: f32,
    max_tokens: u32,
    min_score: f64,
    model: String,
    use_cache: bool,
    use_rerank: bool,
}

/// Pipeline-wide defaults, fixed at construction
#[derive(Debug, Clone)]
struct PipelineSettings {
    model: String,
    cache_enabled: bool,
    rerank_enabled: bool,
    rerank_min_score: f64,
    request_timeout: Duration,
    config: Arc<AppConfig>,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    queries: AtomicU64,
    streams: AtomicU64,
    cache_hits: AtomicU64,
    no_context: AtomicU64,
    failures: AtomicU64,
}

/// Everything needed to generate once retrieval is done
struct ReadyGeneration {
    request: GenerationRequest,
    documents: Vec<Document>,
    metrics: PipelineMetrics,
    started: Instant,
}

enum Prepared {
    Cached(ResponseEnvelope),
    NoContext(ResponseEnvelope),
    Ready(ReadyGeneration),
}

/// Health of each collaborator; `healthy` needs generation and retrieval
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub generation: bool,
    pub retrieval: bool,
    /// `None` when caching is disabled
    pub cache: Option<bool>,
    /// `None` when reranking is disabled
    pub rerank: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub model: String,
    pub use_cache: bool,
    pub use_rerank: bool,
    pub rerank_strategy: String,
    pub queries: u64,
    pub streams: u64,
    pub cache_hits: u64,
    pub no_context: u64,
    pub failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalInfo>,
}

/// Complete RAG service
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct RagService {
    cache: Option<Arc<SemanticCache>>,
    retriever: Arc<HybridRetriever>,
    reranker: Arc<dyn Reranker>,
    generator: Arc<dyn Generator>,
    settings: Arc<PipelineSettings>,
    counters: Arc<PipelineCounters>,
}

impl RagService {
    /// Create from existing services
    ///
    /// Pass `cache = None` to run without caching regardless of configuration.
    pub fn new(
        config: Arc<AppConfig>,
        cache: Option<Arc<SemanticCache>>,
        retriever: Arc<HybridRetriever>,
        reranker: Arc<dyn Reranker>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let settings = PipelineSettings {
            model: config.llm.model.clone(),
            cache_enabled: config.cache.enabled && cache.is_some(),
            rerank_enabled: config.rerank.enabled,
            rerank_min_score: config.rerank.min_score,
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
            config,
        };

        info!(
            "RAG pipeline ready: model={}, cache={}, rerank={} ({})",
            settings.model,
            settings.cache_enabled,
            settings.rerank_enabled,
            reranker.name()
        );

        Self {
            cache,
            retriever,
            reranker,
            generator,
            settings: Arc::new(settings),
            counters: Arc::new(PipelineCounters::default()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.settings.config
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    pub fn cache(&self) -> Option<&Arc<SemanticCache>> {
        self.cache.as_ref()
    }

    fn resolve(&self, question: &str, options: &QueryOptions) -> Result<ResolvedOptions> {
        if question.trim().is_empty() {
            return Err(RagError::Validation("Question cannot be empty".to_string()));
        }
        if options.k == 0 {
            return Err(RagError::Validation("k must be at least 1".to_string()));
        }
        validate_workspace(&options.workspace)?;

        Ok(ResolvedOptions {
            workspace: options.workspace.clone(),
            k: options.k,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            min_score: options.min_score,
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.settings.model.clone()),
            use_cache: self.settings.cache_enabled && options.use_cache.unwrap_or(true),
            use_rerank: options.use_rerank.unwrap_or(self.settings.rerank_enabled),
        })
    }

    fn base_metrics(&self, options: &ResolvedOptions) -> PipelineMetrics {
        PipelineMetrics {
            retrieval_method: SearchMethod::Hybrid.to_string(),
            model: options.model.clone(),
            use_cache: options.use_cache,
            use_rerank: options.use_rerank,
            ..PipelineMetrics::default()
        }
    }

    async fn cache_write(&self, question: &str, workspace: &str, response: &ResponseEnvelope) {
        if let Some(cache) = &self.cache {
            if cache.set(question, workspace, response).await {
                debug!("Response cached for workspace {}", workspace);
            }
        }
    }

    /// Everything up to generation: cache check, retrieval, rerank, context.
    async fn prepare(&self, question: &str, options: &ResolvedOptions) -> Result<Prepared> {
        let started = Instant::now();
        let mut metrics = self.base_metrics(options);

        // Step 1: Cache check
        if options.use_cache {
            if let Some(cache) = &self.cache {
                let cache_start = Instant::now();
                if let Some(mut cached) = cache.get(question, &options.workspace, true).await {
                    let cache_time_ms = elapsed_ms(cache_start);
                    info!(
                        "Cache hit for workspace {} in {:.2}ms",
                        options.workspace, cache_time_ms
                    );
                    cached.metadata.cached = true;
                    cached.metadata.cache_time_ms = Some(cache_time_ms);
                    cached.timestamp = Utc::now();
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Prepared::Cached(cached));
                }
                metrics.cache_time_ms = Some(elapsed_ms(cache_start));
            }
        }

        // Step 2: Retrieve, twice k so the reranker has a choice
        debug!("Retrieving documents for k={}", options.k);
        let retrieval_start = Instant::now();
        let hybrid = HybridOptions::from_config(self.retriever.config(), options.k.saturating_mul(2))
            .with_min_score(options.min_score);
        let outcome = self.retriever.retrieve(question, &hybrid).await;
        if let RetrievalOutcome::Partial { failed_method, .. } = &outcome {
            metrics.retrieval_method = match failed_method {
                SearchMethod::Semantic => SearchMethod::Bm25.to_string(),
                _ => SearchMethod::Semantic.to_string(),
            };
        }
        let mut documents = outcome.into_result()?;
        metrics.retrieval_time_ms = elapsed_ms(retrieval_start);
        info!(
            "Retrieved {} documents in {:.2}ms",
            documents.len(),
            metrics.retrieval_time_ms
        );

        // Step 3: Rerank
        if options.use_rerank && documents.len() > options.k {
            let rerank_start = Instant::now();
            documents = self
                .reranker
                .rerank(
                    question,
                    documents,
                    options.k,
                    options.min_score.max(self.settings.rerank_min_score),
                )
                .await?;
            metrics.rerank_time_ms = elapsed_ms(rerank_start);
            debug!(
                "Reranked to {} documents in {:.2}ms",
                documents.len(),
                metrics.rerank_time_ms
            );
        } else {
            documents.truncate(options.k);
        }

        if documents.is_empty() {
            warn!("No documents found for workspace {}", options.workspace);
            metrics.no_context_found = true;
            metrics.total_time_ms = elapsed_ms(started);
            let response = ResponseEnvelope {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                metadata: metrics,
                timestamp: Utc::now(),
            };
            self.counters.no_context.fetch_add(1, Ordering::Relaxed);
            if options.use_cache {
                self.cache_write(question, &options.workspace, &response).await;
            }
            return Ok(Prepared::NoContext(response));
        }

        // Step 4: Context and prompt
        let context_tokens = self.settings.config.context_limit(&options.model);
        let (context, included) =
            ContextAssembler::for_context_window(context_tokens).assemble_counted(&documents);
        if included < documents.len() {
            debug!(
                "Context budget dropped {} of {} documents",
                documents.len() - included,
                documents.len()
            );
            documents.truncate(included);
        }
        metrics.context_length = context.chars().count();
        metrics.source_count = documents.len();
        debug!(
            "Context built: {} chars from {} documents",
            metrics.context_length,
            documents.len()
        );

        let request = GenerationRequest::new(build_rag_prompt(question, &context), &options.model)
            .with_system(SYSTEM_PROMPT)
            .with_temperature(options.temperature)
            .with_max_tokens(options.max_tokens);

        Ok(Prepared::Ready(ReadyGeneration {
            request,
            documents,
            metrics,
            started,
        }))
    }

    async fn run_query(&self, question: &str, options: &ResolvedOptions) -> Result<ResponseEnvelope> {
        let ready = match self.prepare(question, options).await? {
            Prepared::Cached(response) | Prepared::NoContext(response) => return Ok(response),
            Prepared::Ready(ready) => ready,
        };

        // Step 5: Generate
        let generation_start = Instant::now();
        let answer = self.generator.generate(&ready.request).await?;
        let mut metrics = ready.metrics;
        metrics.generation_time_ms = elapsed_ms(generation_start);
        metrics.total_time_ms = elapsed_ms(ready.started);
        info!(
            "Generated {} chars in {:.2}ms (total {:.2}ms)",
            answer.len(),
            metrics.generation_time_ms,
            metrics.total_time_ms
        );

        let response = ResponseEnvelope {
            answer,
            sources: ContextAssembler::sources(&ready.documents),
            metadata: metrics,
            timestamp: Utc::now(),
        };

        // Step 6: Cache write; an empty answer is never cached
        if options.use_cache && !response.answer.is_empty() {
            self.cache_write(question, &options.workspace, &response).await;
        }
        Ok(response)
    }

    /// Answer a question in one response
    ///
    /// # Errors
    /// - `Validation` for an empty question, `k = 0` or a bad workspace
    /// - `RetrievalFailed` when both searches fail
    /// - Generation errors from the model server
    /// - `Timeout` when the whole call exceeds the request timeout
    pub async fn query(&self, question: &str, options: &QueryOptions) -> Result<ResponseEnvelope> {
        let resolved = self.resolve(question, options)?;
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        info!(
            "Processing RAG query: workspace={}, k={}, model={}",
            resolved.workspace, resolved.k, resolved.model
        );

        let result = tokio::time::timeout(
            self.settings.request_timeout,
            self.run_query(question, &resolved),
        )
        .await
        .map_err(|_| {
            RagError::Timeout(format!(
                "RAG query exceeded {}s",
                self.settings.request_timeout.as_secs()
            ))
        })
        .and_then(|r| r);

        if let Err(e) = &result {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            error!("RAG query failed: {}", e);
        }
        result
    }

    /// Answer a question as a stream of frames.
    ///
    /// Validation happens before the stream is returned; any later failure
    /// arrives as the single terminal error frame.
    pub fn query_stream(&self, question: &str, options: &QueryOptions) -> Result<FrameStream> {
        let resolved = self.resolve(question, options)?;
        self.counters.streams.fetch_add(1, Ordering::Relaxed);
        info!(
            "Processing streaming RAG query: workspace={}, k={}, model={}",
            resolved.workspace, resolved.k, resolved.model
        );

        let service = self.clone();
        let question = question.to_string();

        Ok(Box::pin(async_stream::stream! {
            let ready = match service.prepare(&question, &resolved).await {
                Ok(Prepared::Ready(ready)) => ready,
                Ok(Prepared::Cached(response) | Prepared::NoContext(response)) => {
                    for frame in single_answer_frames(response) {
                        yield frame;
                    }
                    return;
                }
                Err(e) => {
                    service.counters.failures.fetch_add(1, Ordering::Relaxed);
                    error!("Streaming RAG query failed before generation: {}", e);
                    yield StreamFrame::from_error(&e);
                    return;
                }
            };

            let ReadyGeneration { request, documents, mut metrics, started } = ready;
            let generation_start = Instant::now();
            let mut frames = stream_response(Arc::clone(&service.generator), request);
            let mut answer = String::new();

            while let Some(frame) = frames.next().await {
                match frame {
                    StreamFrame::Token { ref token, .. } => {
                        answer.push_str(token);
                        yield frame;
                    }
                    StreamFrame::Complete { stats, .. } => {
                        metrics.generation_time_ms = elapsed_ms(generation_start);
                        metrics.total_time_ms = elapsed_ms(started);
                        let sources = ContextAssembler::sources(&documents);

                        if resolved.use_cache && !answer.is_empty() {
                            let response = ResponseEnvelope {
                                answer: std::mem::take(&mut answer),
                                sources: sources.clone(),
                                metadata: metrics.clone(),
                                timestamp: Utc::now(),
                            };
                            let writer = service.clone();
                            let question = question.clone();
                            let workspace = resolved.workspace.clone();
                            tokio::spawn(async move {
                                writer.cache_write(&question, &workspace, &response).await;
                            });
                        }

                        info!("Streaming RAG query complete in {:.2}ms", metrics.total_time_ms);
                        yield StreamFrame::Complete {
                            done: true,
                            stats,
                            sources: Some(sources),
                            metadata: Some(metrics),
                        };
                        return;
                    }
                    StreamFrame::Error { .. } => {
                        service.counters.failures.fetch_add(1, Ordering::Relaxed);
                        yield frame;
                        return;
                    }
                }
            }
        }))
    }

    /// Health of each collaborator, checked concurrently
    pub async fn health_check(&self) -> HealthReport {
        let cache = async {
            match &self.cache {
                Some(cache) if self.settings.cache_enabled => Some(cache.health_check().await),
                _ => None,
            }
        };
        let rerank = async {
            if self.settings.rerank_enabled {
                Some(self.reranker.health_check().await)
            } else {
                None
            }
        };
        let (generation, retrieval, cache, rerank) = tokio::join!(
            self.generator.health_check(),
            self.retriever.health_check(),
            cache,
            rerank
        );

        let report = HealthReport {
            healthy: generation && retrieval,
            generation,
            retrieval,
            cache,
            rerank,
        };
        info!("Health check: {:?}", report);
        report
    }

    pub async fn stats(&self, workspace: Option<&str>) -> PipelineStats {
        let workspace = workspace.unwrap_or(&self.settings.config.pipeline.default_workspace);
        let cache = match &self.cache {
            Some(cache) if self.settings.cache_enabled => Some(cache.stats(workspace).await),
            _ => None,
        };
        let retrieval = match self.retriever.collection_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Collection info unavailable: {}", e);
                None
            }
        };

        PipelineStats {
            model: self.settings.model.clone(),
            use_cache: self.settings.cache_enabled,
            use_rerank: self.settings.rerank_enabled,
            rerank_strategy: self.reranker.name().to_string(),
            queries: self.counters.queries.load(Ordering::Relaxed),
            streams: self.counters.streams.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            no_context: self.counters.no_context.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            cache,
            retrieval,
        }
    }

    /// Remove a cached query, or every entry of the workspace. Returns keys removed.
    pub async fn invalidate_cache(&self, workspace: &str, query: Option<&str>) -> Result<usize> {
        validate_workspace(workspace)?;
        match &self.cache {
            Some(cache) => Ok(cache.invalidate(workspace, query).await),
            None => Ok(0),
        }
    }

    /// Rebuild the keyword corpus from the index
    pub async fn reload_documents(&self) -> Result<usize> {
        info!("Reloading keyword corpus");
        self.retriever.load_documents(true).await
    }
}

/// A ready answer streamed as one token frame and the terminal frame.
/// An empty answer yields the terminal frame alone.
fn single_answer_frames(response: ResponseEnvelope) -> Vec<StreamFrame> {
    let mut metrics = StreamMetrics::start();
    if !response.answer.is_empty() {
        metrics.add_chunk(&response.answer);
    }
    let snapshot = metrics.snapshot();
    let total_response_length = snapshot.total_characters;

    let ResponseEnvelope {
        answer,
        sources,
        metadata,
        ..
    } = response;
    let mut frames = Vec::with_capacity(2);
    if !answer.is_empty() {
        frames.push(StreamFrame::token(answer, snapshot.clone()));
    }
    frames.push(StreamFrame::Complete {
        done: true,
        stats: StreamStats {
            metrics: snapshot,
            total_response_length,
        },
        sources: Some(sources),
        metadata: Some(metadata),
    });
    frames
}

impl std::fmt::Debug for RagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagService")
            .field("model", &self.settings.model)
            .field("cache_enabled", &self.settings.cache_enabled)
            .field("rerank", &self.reranker.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_workspace() {
        assert!(validate_workspace("greenfrog").is_ok());
        assert!(validate_workspace("team_a-2").is_ok());
        assert!(validate_workspace("").is_err());
        assert!(validate_workspace("a*b").is_err());
        assert!(validate_workspace("a:b").is_err());
    }

    #[test]
    fn test_query_options_from_config() {
        let mut config = AppConfig::default();
        config.pipeline.default_k = 7;
        config.llm.temperature = 0.2;
        let options = QueryOptions::from_config(&config);
        assert_eq!(options.k, 7);
        assert!((options.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(options.workspace, "greenfrog");
        assert_eq!(options.model, None);
    }

    #[test]
    fn test_single_answer_frames() {
        let response = ResponseEnvelope {
            answer: "cached answer".to_string(),
            sources: Vec::new(),
            metadata: PipelineMetrics {
                cached: true,
                ..PipelineMetrics::default()
            },
            timestamp: Utc::now(),
        };
        let frames = single_answer_frames(response);
        assert_eq!(frames.len(), 2);
        let [token, terminal]: [StreamFrame; 2] = frames.try_into().unwrap();

        match token {
            StreamFrame::Token { token, done, metrics } => {
                assert_eq!(token, "cached answer");
                assert!(!done);
                assert_eq!(metrics.token_count, 1);
            }
            other => panic!("expected token frame, got {other:?}"),
        }
        match terminal {
            StreamFrame::Complete {
                done,
                stats,
                metadata,
                ..
            } => {
                assert!(done);
                assert_eq!(stats.total_response_length, "cached answer".len());
                assert!(metadata.unwrap().cached);
            }
            other => panic!("expected complete frame, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_answer_streams_terminal_frame_only() {
        let response = ResponseEnvelope {
            answer: String::new(),
            sources: Vec::new(),
            metadata: PipelineMetrics::default(),
            timestamp: Utc::now(),
        };
        let frames = single_answer_frames(response);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            StreamFrame::Complete { stats, .. } => {
                assert_eq!(stats.metrics.token_count, 0);
                assert_eq!(stats.total_response_length, 0);
            }
            other => panic!("expected complete frame, got {other:?}"),
        }
    }
}
