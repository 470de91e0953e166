use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Open metadata attached to a document (`source`, `title`, ...).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which ranking produced a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// Vector similarity
    Semantic,
    /// BM25 keyword ranking
    Bm25,
    /// Reciprocal Rank Fusion of both
    Hybrid,
}

impl SearchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Bm25 => "bm25",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved document.
///
/// `score` is the ranking score of the method that produced it; after fusion
/// it equals `rrf_score`, and the per-method scores stay in the annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SearchMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f64>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
            score,
            method: None,
            distance: None,
            semantic_score: None,
            semantic_rank: None,
            bm25_score: None,
            bm25_rank: None,
            rrf_score: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: SearchMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// `metadata.source` when it is a string
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// A document as shown to the caller in a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SearchMethod>,
}

const SOURCE_PREVIEW_CHARS: usize = 200;

impl From<&Document> for SourceDocument {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            text: truncate_chars(&doc.text, SOURCE_PREVIEW_CHARS),
            score: round_to(doc.score, 4),
            metadata: doc.metadata.clone(),
            method: doc.method,
        }
    }
}

/// Timings and flags describing one pipeline execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub cached: bool,
    pub retrieval_method: String,
    pub retrieval_time_ms: f64,
    pub rerank_time_ms: f64,
    pub generation_time_ms: f64,
    pub total_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_time_ms: Option<f64>,
    pub model: String,
    pub context_length: usize,
    pub source_count: usize,
    pub use_cache: bool,
    pub use_rerank: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_context_found: bool,
}

/// The uniform result of a query, cached and returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub answer: String,
    pub sources: Vec<SourceDocument>,
    pub metadata: PipelineMetrics,
    pub timestamp: DateTime<Utc>,
}

/// Round to `places` decimals (for reported scores and timings)
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Milliseconds since `start`, rounded to 2 decimals
pub fn elapsed_ms(start: std::time::Instant) -> f64 {
    round_to(start.elapsed().as_secs_f64() * 1000.0, 2)
}

/// Keep the first `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        // Multi-byte characters are counted as characters
        assert_eq!(truncate_chars("héllo wörld", 4), "héll...");
    }

    #[test]
    fn test_round_to() {
        assert!((round_to(0.123_456, 4) - 0.1235).abs() < 1e-12);
        assert!((round_to(12.345_67, 2) - 12.35).abs() < 1e-12);
    }

    #[test]
    fn test_source_document_preview() {
        let mut meta = Metadata::new();
        meta.insert("source".into(), "faq.md".into());
        let doc = Document::new("d1", "x".repeat(250), 0.876_543_21)
            .with_metadata(meta)
            .with_method(SearchMethod::Hybrid);

        assert_eq!(doc.source(), Some("faq.md"));
        let source = SourceDocument::from(&doc);
        assert_eq!(source.text.chars().count(), 203);
        assert!(source.text.ends_with("..."));
        assert!((source.score - 0.8765).abs() < 1e-12);
        assert_eq!(source.method, Some(SearchMethod::Hybrid));
    }

    #[test]
    fn test_search_method_serde() {
        let json = serde_json::to_string(&SearchMethod::Bm25).unwrap();
        assert_eq!(json, "\"bm25\"");
        assert_eq!(SearchMethod::Hybrid.to_string(), "hybrid");
    }
}
