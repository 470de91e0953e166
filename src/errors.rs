use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed document at index {index}: {reason}")]
    MalformedDocument { index: usize, reason: String },

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Queue full: {depth} requests waiting (max {max_depth}), retry after {retry_after_secs}s")]
    QueueFull {
        depth: usize,
        max_depth: usize,
        retry_after_secs: u64,
    },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Custom(String),
}

impl RagError {
    /// True for deadline expiry on any external call.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True for errors caused by the caller's input rather than a dependency.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::MalformedDocument { .. })
    }

    /// Seconds the caller should wait before retrying, when the error carries one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::QueueFull {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<redis::RedisError> for RagError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("cache store: {err}"))
        } else {
            Self::CacheError(err.to_string())
        }
    }
}

impl From<config::ConfigError> for RagError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RagError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
