//! Unit tests for error handling
//!
//! Tests error types, conversions, and error message formatting.

#[cfg(test)]
mod tests {
    use crate::errors::RagError;
    use std::io;

    // ====== Error Type Tests ======

    #[test]
    fn test_custom_error() {
        let error = RagError::Custom("Test error message".to_string());
        assert_eq!(format!("{}", error), "Test error message");
    }

    #[test]
    fn test_config_error() {
        let error = RagError::ConfigError("cache.similarity_threshold out of range".to_string());
        assert!(matches!(error, RagError::ConfigError(_)));
        assert!(format!("{}", error).contains("configuration"));
    }

    #[test]
    fn test_malformed_document_display() {
        let error = RagError::MalformedDocument {
            index: 2,
            reason: "missing id".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("index 2"));
        assert!(display.contains("missing id"));
        assert!(error.is_validation());
    }

    #[test]
    fn test_queue_full_carries_retry_after() {
        let error = RagError::QueueFull {
            depth: 10,
            max_depth: 10,
            retry_after_secs: 5,
        };
        assert_eq!(error.retry_after(), Some(5));
        assert!(!error.is_timeout());
        assert!(format!("{}", error).contains("retry after 5s"));
    }

    #[test]
    fn test_timeout_is_distinguishable() {
        let timeout = RagError::Timeout("generation".to_string());
        let llm = RagError::LlmError("503 Service Unavailable".to_string());
        assert!(timeout.is_timeout());
        assert!(!llm.is_timeout());
        assert_eq!(llm.retry_after(), None);
    }

    #[test]
    fn test_validation_error() {
        let error = RagError::Validation("question must not be empty".to_string());
        assert!(error.is_validation());
        assert!(!RagError::LlmError("x".to_string()).is_validation());
    }

    // ====== Error Conversion Tests ======

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let rag_err: RagError = io_err.into();
        assert!(matches!(rag_err, RagError::Io(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let parse_result: Result<serde_json::Value, _> = serde_json::from_str("{invalid json}");
        if let Err(json_err) = parse_result {
            let rag_err: RagError = json_err.into();
            assert!(matches!(rag_err, RagError::Serialization(_)));
        }
    }

    #[test]
    fn test_error_from_toml() {
        let parse_result: Result<toml::Value, _> = toml::from_str("[server\nport = ");
        if let Err(toml_err) = parse_result {
            let rag_err: RagError = toml_err.into();
            assert!(matches!(rag_err, RagError::TomlParsing(_)));
        }
    }

    #[test]
    fn test_error_from_redis() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::ResponseError, "WRONGTYPE"));
        let rag_err: RagError = redis_err.into();
        assert!(matches!(rag_err, RagError::CacheError(_)));
    }

    #[tokio::test]
    async fn test_error_from_elapsed() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        let rag_err: RagError = elapsed.into();
        assert!(rag_err.is_timeout());
    }

    // ====== Error Debug/Display Tests ======

    #[test]
    fn test_error_debug_format() {
        let error = RagError::Custom("Debug test".to_string());
        assert!(format!("{:?}", error).contains("Custom"));
    }
}
