//! Text generation through an Ollama-compatible inference server
//!
//! [`Generator`] is the seam between the pipeline and the model server.
//! [`OllamaClient`] implements it over HTTP; [`streaming`] turns a raw
//! token feed into framed progress events.

pub mod client;
pub mod streaming;

use async_trait::async_trait;
use serde::Serialize;

pub use client::OllamaClient;
pub use streaming::StreamFrame;
pub use streaming::StreamingResponse;

use crate::errors::Result;

/// One generation call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: model.into(),
            temperature: crate::config::default_temperature(),
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the full completion in one call
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Start a streamed completion; chunks arrive as they are produced
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<StreamingResponse>;

    async fn health_check(&self) -> bool;
}
