//! API request and response types

use serde::Deserialize;
use serde::Serialize;

use crate::errors::RagError;
use crate::errors::Result;
use crate::rag::QueryOptions;

pub const MAX_MESSAGE_CHARS: usize = 10_000;
pub const MAX_K: usize = 20;
pub const MAX_TEMPERATURE: f32 = 2.0;
pub const MAX_TOKENS_LIMIT: u32 = 4096;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// RAG query request, shared by the JSON and SSE endpoints.
///
/// Unset fields fall back to the server's configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RagQueryRequest {
    pub message: String,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub use_cache: Option<bool>,
    #[serde(default)]
    pub use_rerank: Option<bool>,
}

impl RagQueryRequest {
    pub fn validate(&self) -> Result<()> {
        let chars = self.message.chars().count();
        if self.message.trim().is_empty() {
            return Err(RagError::Validation("message cannot be empty".to_string()));
        }
        if chars > MAX_MESSAGE_CHARS {
            return Err(RagError::Validation(format!(
                "message is {chars} characters, maximum is {MAX_MESSAGE_CHARS}"
            )));
        }
        if let Some(k) = self.k {
            if !(1..=MAX_K).contains(&k) {
                return Err(RagError::Validation(format!("k must be between 1 and {MAX_K}")));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
                return Err(RagError::Validation(format!(
                    "temperature must be between 0 and {MAX_TEMPERATURE}"
                )));
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if !(1..=MAX_TOKENS_LIMIT).contains(&max_tokens) {
                return Err(RagError::Validation(format!(
                    "max_tokens must be between 1 and {MAX_TOKENS_LIMIT}"
                )));
            }
        }
        Ok(())
    }

    /// Overlay the request on `defaults`
    pub fn to_options(&self, defaults: QueryOptions) -> QueryOptions {
        QueryOptions {
            workspace: self.workspace.clone().unwrap_or(defaults.workspace),
            k: self.k.unwrap_or(defaults.k),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            min_score: self.min_score.unwrap_or(defaults.min_score),
            model: self.model.clone().or(defaults.model),
            use_cache: self.use_cache.or(defaults.use_cache),
            use_rerank: self.use_rerank.or(defaults.use_rerank),
        }
    }
}

/// Cache invalidation request; without `query` the whole workspace is cleared
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub workspace: String,
    pub removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub documents: usize,
}

/// Optional `?workspace=` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceQuery {
    #[serde(default)]
    pub workspace: Option<String>,
}
