//! Streaming response handling
//!
//! A generator hands back a [`StreamingResponse`] of raw token chunks.
//! [`stream_response`] wraps that feed into [`StreamFrame`]s carrying
//! running metrics, and guarantees exactly one terminal frame.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::GenerationRequest;
use super::Generator;
use crate::errors::RagError;
use crate::errors::Result;
use crate::models::round_to;
use crate::models::PipelineMetrics;
use crate::models::SourceDocument;

pub const EMPTY_PROMPT_MESSAGE: &str = "Prompt cannot be empty";
pub const TIMEOUT_MESSAGE: &str = "Request timeout: Ollama service did not respond in time";

/// Streaming response from LLM
pub struct StreamingResponse {
    stream: Pin<Box<dyn Stream<Item = Result<String>> + Send>>,
}

impl StreamingResponse {
    pub fn new(stream: Pin<Box<dyn Stream<Item = Result<String>> + Send>>) -> Self {
        Self { stream }
    }

    /// Collect all chunks into a single string
    pub async fn collect_all(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(chunk) = self.stream.next().await {
            result.push_str(&chunk?);
        }
        Ok(result)
    }

    /// Get the underlying stream
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Result<String>> + Send>> {
        self.stream
    }
}

/// Boxed stream of frames, as handed to transports
pub type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// Running counters for one stream
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    started: Instant,
    token_count: usize,
    chunk_count: usize,
    total_characters: usize,
}

/// Point-in-time view of [`StreamMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub token_count: usize,
    pub chunk_count: usize,
    pub total_characters: usize,
    pub elapsed_ms: f64,
    pub tokens_per_second: f64,
}

impl StreamMetrics {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            token_count: 0,
            chunk_count: 0,
            total_characters: 0,
        }
    }

    /// Each chunk from the model server counts as one token.
    pub fn add_chunk(&mut self, content: &str) {
        self.chunk_count += 1;
        self.token_count += 1;
        self.total_characters += content.chars().count();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        MetricsSnapshot {
            token_count: self.token_count,
            chunk_count: self.chunk_count,
            total_characters: self.total_characters,
            elapsed_ms: round_to(elapsed_secs * 1000.0, 2),
            tokens_per_second: round_to(self.token_count as f64 / elapsed_secs.max(0.001), 2),
        }
    }
}

/// Final statistics sent with the terminal frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub total_response_length: usize,
}

/// One event of a streamed answer.
///
/// Serialized without a tag: `{token, done: false, metrics}`,
/// `{done: true, stats, ...}` or `{error, done: true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    Token {
        token: String,
        done: bool,
        metrics: MetricsSnapshot,
    },
    Error {
        error: String,
        done: bool,
    },
    Complete {
        done: bool,
        stats: StreamStats,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sources: Option<Vec<SourceDocument>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<PipelineMetrics>,
    },
}

impl StreamFrame {
    pub fn token(token: impl Into<String>, metrics: MetricsSnapshot) -> Self {
        Self::Token {
            token: token.into(),
            done: false,
            metrics,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            done: true,
        }
    }

    pub fn complete(stats: StreamStats) -> Self {
        Self::Complete {
            done: true,
            stats,
            sources: None,
            metadata: None,
        }
    }

    /// Error frame for a failed generation; timeouts get a fixed message.
    pub fn from_error(err: &RagError) -> Self {
        if err.is_timeout() {
            Self::error(TIMEOUT_MESSAGE)
        } else if err.is_validation() {
            Self::error(err.to_string())
        } else {
            Self::error(format!("Streaming error: {err}"))
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }

    /// Render as one Server-Sent Events message
    pub fn to_sse(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Drive `generator` and frame its output.
///
/// Empty chunks are skipped. Every path ends with exactly one terminal
/// frame: `Complete` on success, `Error` on empty prompt or failure.
pub fn stream_response(generator: Arc<dyn Generator>, request: GenerationRequest) -> FrameStream {
    Box::pin(async_stream::stream! {
        if request.prompt.trim().is_empty() {
            error!("Refusing to stream an empty prompt");
            yield StreamFrame::error(EMPTY_PROMPT_MESSAGE);
            return;
        }

        info!(
            "Stream start: model={}, prompt_length={}, temperature={}",
            request.model,
            request.prompt.len(),
            request.temperature
        );

        let mut metrics = StreamMetrics::start();
        let mut chunks = match generator.generate_stream(&request).await {
            Ok(response) => response.into_stream(),
            Err(e) => {
                error!("Stream failed to start: {}", e);
                yield StreamFrame::from_error(&e);
                return;
            }
        };

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(token) if token.is_empty() => continue,
                Ok(token) => {
                    metrics.add_chunk(&token);
                    debug!("Stream chunk: {} chars, {} total tokens", token.len(), metrics.token_count);
                    let snapshot = metrics.snapshot();
                    yield StreamFrame::token(token, snapshot);
                }
                Err(e) => {
                    error!("Stream failed after {} tokens: {}", metrics.token_count, e);
                    yield StreamFrame::from_error(&e);
                    return;
                }
            }
        }

        let snapshot = metrics.snapshot();
        info!(
            "Stream complete: model={}, tokens={}, chars={}, elapsed_ms={}",
            request.model, snapshot.token_count, snapshot.total_characters, snapshot.elapsed_ms
        );
        let total_response_length = snapshot.total_characters;
        yield StreamFrame::complete(StreamStats {
            metrics: snapshot,
            total_response_length,
        });
    })
}
