//! Context assembly from retrieved documents

use tracing::debug;

use crate::models::truncate_chars;
use crate::models::Document;
use crate::models::SourceDocument;

/// Characters kept from each document
pub const MAX_CHARS_PER_DOC: usize = 300;

/// Rough English average used to turn a token window into characters
pub const CHARS_PER_TOKEN: usize = 4;

/// Assembler for creating the numbered context block
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    max_context_length: usize,
    max_chars_per_doc: usize,
}

impl ContextAssembler {
    #[must_use]
    pub const fn new(max_context_length: usize) -> Self {
        Self {
            max_context_length,
            max_chars_per_doc: MAX_CHARS_PER_DOC,
        }
    }

    /// Budget for a model with a `context_tokens` window; half the window
    /// is left for the prompt scaffolding and the answer.
    #[must_use]
    pub const fn for_context_window(context_tokens: usize) -> Self {
        Self::new(context_tokens * CHARS_PER_TOKEN / 2)
    }

    pub const fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    /// Format one entry: `[Source i: source] (relevance: x.xx): text`
    fn format_entry(&self, position: usize, doc: &Document) -> String {
        let label = match doc.source().filter(|s| !s.is_empty()) {
            Some(source) => format!("[Source {position}: {source}]"),
            None => format!("[Source {position}]"),
        };
        format!(
            "{label} (relevance: {:.2}): {}",
            doc.score,
            truncate_chars(&doc.text, self.max_chars_per_doc)
        )
    }

    /// Assemble context from documents in rank order, stopping before the
    /// entry that would exceed the budget.
    #[must_use]
    pub fn assemble(&self, documents: &[Document]) -> String {
        self.assemble_counted(documents).0
    }

    /// Like [`ContextAssembler::assemble`], also returning how many leading
    /// documents made it into the context.
    #[must_use]
    pub fn assemble_counted(&self, documents: &[Document]) -> (String, usize) {
        let mut context = String::new();
        let mut total_length = 0;
        let mut included = 0;

        for (idx, doc) in documents.iter().enumerate() {
            let entry = self.format_entry(idx + 1, doc);
            let separator = if context.is_empty() { 0 } else { 2 };
            let entry_len = entry.chars().count() + separator;

            if total_length + entry_len > self.max_context_length {
                debug!(
                    "Context budget reached after {} of {} documents",
                    idx,
                    documents.len()
                );
                break;
            }

            if separator > 0 {
                context.push_str("\n\n");
            }
            context.push_str(&entry);
            total_length += entry_len;
            included += 1;
        }

        (context, included)
    }

    /// Caller-facing source list
    #[must_use]
    pub fn sources(documents: &[Document]) -> Vec<SourceDocument> {
        documents.iter().map(SourceDocument::from).collect()
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::for_context_window(4096)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn with_source(mut doc: Document, source: &str) -> Document {
        doc.metadata.insert("source".to_string(), json!(source));
        doc
    }

    #[test]
    fn test_entry_format() {
        let docs = vec![
            with_source(Document::new("a", "alpha text", 0.8765), "guide.md"),
            Document::new("b", "beta text", 0.5),
        ];
        let context = ContextAssembler::default().assemble(&docs);
        assert_eq!(
            context,
            "[Source 1: guide.md] (relevance: 0.88): alpha text\n\n[Source 2] (relevance: 0.50): beta text"
        );
    }

    #[test]
    fn test_long_text_truncated() {
        let docs = vec![Document::new("a", "x".repeat(500), 0.1)];
        let context = ContextAssembler::default().assemble(&docs);
        assert!(context.ends_with(&format!("{}...", "x".repeat(300))));
        assert!(!context.contains(&"x".repeat(301)));
    }

    #[test]
    fn test_budget_stops_assembly() {
        let docs: Vec<Document> = (0..10)
            .map(|i| Document::new(format!("d{i}"), "y".repeat(100), 0.5))
            .collect();
        let assembler = ContextAssembler::new(300);
        let (context, included) = assembler.assemble_counted(&docs);
        assert!(context.chars().count() <= 300);
        assert!(context.contains("[Source 2]"));
        assert!(!context.contains("[Source 3]"));
        assert_eq!(included, 2);
        assert_eq!(assembler.assemble(&docs), context);
    }

    #[test]
    fn test_window_budget() {
        assert_eq!(ContextAssembler::for_context_window(4096).max_context_length(), 8192);
        assert_eq!(ContextAssembler::for_context_window(8192).max_context_length(), 16384);
    }

    #[test]
    fn test_empty_source_uses_plain_label() {
        let docs = vec![with_source(Document::new("a", "t", 0.1), "")];
        assert!(ContextAssembler::default().assemble(&docs).starts_with("[Source 1] "));
    }
}
