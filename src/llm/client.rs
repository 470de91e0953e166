//! Ollama HTTP client

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::GenerationRequest;
use super::Generator;
use super::StreamingResponse;
use crate::config::LlmConfig;
use crate::errors::RagError;
use crate::errors::Result;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

impl<'a> GenerateRequest<'a> {
    fn from_request(request: &'a GenerationRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            prompt: &request.prompt,
            temperature: request.temperature,
            stream,
            system: request.system.as_deref(),
            options: request
                .max_tokens
                .map(|num_predict| GenerateOptions { num_predict }),
        }
    }
}

/// One NDJSON line of `/api/generate`
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    total_duration: Option<u64>,
}

/// Client for the Ollama generation API
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
    stream_idle_timeout: Duration,
    health_timeout: Duration,
}

impl OllamaClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        // Deadlines are set per request; a streamed body may legitimately outlive `timeout`
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(RagError::LlmError(format!(
            "Ollama API error ({status}): {error_text}"
        )))
    }
}

/// Parse one NDJSON line. Returns the token (if any) and whether the stream is done.
fn parse_stream_line(line: &[u8]) -> Result<(Option<String>, bool)> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok((None, false));
    }

    match serde_json::from_str::<GenerateChunk>(trimmed) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return Err(RagError::LlmError(error));
            }
            if chunk.done {
                info!(
                    "Ollama stream complete ({} ms)",
                    chunk.total_duration.unwrap_or(0) / 1_000_000
                );
            }
            Ok((chunk.response, chunk.done))
        }
        Err(e) => {
            let preview: String = trimmed.chars().take(100).collect();
            warn!("Skipping invalid JSON line in Ollama stream: {} ({})", preview, e);
            Ok((None, false))
        }
    }
}

/// Split a streamed `/api/generate` body into tokens.
///
/// Fails with `Timeout` when no bytes arrive for `idle_timeout`.
fn ndjson_tokens(
    response: reqwest::Response,
    idle_timeout: Duration,
) -> impl futures::Stream<Item = Result<String>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;

        while !finished {
            let next = tokio::time::timeout(idle_timeout, body.next())
                .await
                .map_err(|_| RagError::Timeout("Ollama stream stalled".to_string()))?;
            let bytes = match next {
                Some(bytes) => bytes?,
                None => break,
            };
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let (token, done) = parse_stream_line(&line)?;
                if let Some(token) = token {
                    yield token;
                }
                if done {
                    finished = true;
                    break;
                }
            }
        }

        // A final line without trailing newline
        if !finished && !buffer.is_empty() {
            let (token, _) = parse_stream_line(&buffer)?;
            if let Some(token) = token {
                yield token;
            }
        }
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let url = format!("{}/api/generate", self.endpoint);
        debug!(
            "Calling Ollama generate API: model={}, prompt_length={}",
            request.model,
            request.prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&GenerateRequest::from_request(request, false))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::LlmError(format!("Failed to parse response: {e}")))?;

        Ok(result.response)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<StreamingResponse> {
        let url = format!("{}/api/generate", self.endpoint);
        info!(
            "Starting Ollama stream: model={}, prompt_length={}",
            request.model,
            request.prompt.len()
        );

        // The first byte must arrive within the normal request deadline
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&url)
                .json(&GenerateRequest::from_request(request, true))
                .send(),
        )
        .await
        .map_err(|_| RagError::Timeout("Ollama did not start streaming in time".to_string()))??;
        let response = Self::check_status(response).await?;

        let tokens = ndjson_tokens(response, self.stream_idle_timeout);
        Ok(StreamingResponse::new(Box::pin(tokens)))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);
        match self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Ollama health check failed: {}", e);
                false
            }
        }
    }
}
