//! End-to-end pipeline behaviour over in-memory backends

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures::StreamExt;
use ragserve::config::ModelContextLimit;
use ragserve::embeddings::Embedder;
use ragserve::index::IndexRecord;
use ragserve::index::VectorIndex;
use ragserve::llm::StreamFrame;
use ragserve::rag::prompts::NO_CONTEXT_ANSWER;
use ragserve::rag::HybridRetriever;
use ragserve::rag::QueryOptions;
use ragserve::RagError;
use ragserve::Result;

fn options() -> QueryOptions {
    QueryOptions::default()
}

fn uncached() -> QueryOptions {
    QueryOptions {
        use_cache: Some(false),
        ..QueryOptions::default()
    }
}

#[tokio::test]
async fn test_repeat_question_served_from_cache() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    let first = rag.query("How does rust async work?", &options()).await?;
    assert!(!first.metadata.cached);
    assert!(first.metadata.source_count > 0);
    assert!(first.metadata.source_count <= 5);
    assert_eq!(first.sources.len(), first.metadata.source_count);
    assert_eq!(first.metadata.model, "test-model");
    assert_eq!(first.metadata.retrieval_method, "hybrid");
    assert_eq!(test.generator.calls(), 1);

    let second = rag.query("How does rust async work?", &options()).await?;
    assert!(second.metadata.cached);
    assert!(second.metadata.cache_time_ms.is_some());
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.sources, first.sources);
    assert_eq!(test.generator.calls(), 1);

    let stats = rag.stats(None).await;
    assert_eq!(stats.queries, 2);
    assert_eq!(stats.cache_hits, 1);
    Ok(())
}

#[tokio::test]
async fn test_similar_question_hits_semantic_cache() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    rag.query("How does rust async work?", &options()).await?;
    // Same bag of words, different text
    let similar = rag.query("async in rust, how?", &options()).await?;
    assert!(similar.metadata.cached);
    assert_eq!(test.generator.calls(), 1);

    // Cosine 0.5 against the cached question, below the 0.95 default
    let different = rag.query("Is python like rust?", &options()).await?;
    assert!(!different.metadata.cached);
    assert_eq!(test.generator.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_similarity_threshold_boundary() -> Result<()> {
    // "Explain rust" vs the cached "rust async" question: cosine 1/sqrt(2) ~ 0.707
    for (threshold, expect_hit) in [(0.70, true), (0.75, false)] {
        let mut config = test_config();
        config.cache.similarity_threshold = threshold;
        let test = build_app(config, corpus()).await?;

        test.app
            .rag
            .query("How does rust async work?", &options())
            .await?;
        let response = test.app.rag.query("Explain rust", &options()).await?;
        assert_eq!(
            response.metadata.cached, expect_hit,
            "threshold {threshold}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_cache_is_scoped_to_workspace() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    rag.query("How does rust async work?", &options()).await?;
    let other = QueryOptions {
        workspace: "other-team".to_string(),
        ..options()
    };
    let response = rag.query("How does rust async work?", &other).await?;
    assert!(!response.metadata.cached);
    assert_eq!(test.generator.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cache_disabled_per_request() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    rag.query("How does rust async work?", &uncached()).await?;
    let response = rag.query("How does rust async work?", &uncached()).await?;
    assert!(!response.metadata.cached);
    assert!(!response.metadata.use_cache);
    assert_eq!(test.generator.calls(), 2);
    assert!(test.store.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_empty_index_returns_no_context_answer() -> Result<()> {
    let test = build_app(test_config(), Vec::new()).await?;
    let rag = &test.app.rag;

    let response = rag.query("How does rust async work?", &options()).await?;
    assert_eq!(response.answer, NO_CONTEXT_ANSWER);
    assert!(response.sources.is_empty());
    assert!(response.metadata.no_context_found);
    assert_eq!(response.metadata.source_count, 0);
    assert_eq!(test.generator.calls(), 0);

    // No-context answers are cached like any other
    let repeat = rag.query("How does rust async work?", &options()).await?;
    assert!(repeat.metadata.cached);
    assert!(repeat.metadata.no_context_found);
    assert_eq!(rag.stats(None).await.no_context, 1);
    Ok(())
}

#[tokio::test]
async fn test_rerank_floor_can_leave_no_context() -> Result<()> {
    let mut config = test_config();
    // Fused RRF scores are far below 1.0
    config.rerank.min_score = 1.0;
    let test = build_app(config, corpus()).await?;

    let options = QueryOptions {
        k: 1,
        ..uncached()
    };
    let response = test
        .app
        .rag
        .query("How does rust async work?", &options)
        .await?;
    assert!(response.metadata.no_context_found);
    assert_eq!(test.generator.calls(), 0);

    // Without reranking the same floor does not apply
    let plain = QueryOptions {
        use_rerank: Some(false),
        ..options
    };
    let response = test
        .app
        .rag
        .query("How does rust async work?", &plain)
        .await?;
    assert_eq!(response.metadata.source_count, 1);
    assert!(!response.metadata.use_rerank);
    Ok(())
}

#[tokio::test]
async fn test_embedding_outage_degrades_to_bm25() -> Result<()> {
    let test = build_app_with(
        test_config(),
        corpus(),
        Arc::new(DownEmbedder),
        ScriptedGenerator::default(),
    )
    .await?;

    // "runtimes" occurs in one document only, so it has a positive idf
    let response = test.app.rag.query("tokio runtimes", &options()).await?;
    assert_eq!(response.metadata.retrieval_method, "bm25");
    assert!(!response.metadata.cached);
    assert_eq!(response.sources[0].id, "doc-rust");
    assert_eq!(test.generator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_generation_failure_is_reported() -> Result<()> {
    let test = build_app_with(
        test_config(),
        corpus(),
        Arc::new(KeywordEmbedder),
        ScriptedGenerator::failing(),
    )
    .await?;

    let err = test
        .app
        .rag
        .query("How does rust async work?", &options())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::LlmError(_)));
    assert_eq!(test.app.rag.stats(None).await.failures, 1);
    assert!(test.store.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_query_validation() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    let err = rag.query("   ", &options()).await.unwrap_err();
    assert!(err.is_validation());

    let zero_k = QueryOptions { k: 0, ..options() };
    assert!(rag.query("rust", &zero_k).await.unwrap_err().is_validation());

    let bad_workspace = QueryOptions {
        workspace: "a:b".to_string(),
        ..options()
    };
    assert!(rag
        .query("rust", &bad_workspace)
        .await
        .unwrap_err()
        .is_validation());
    assert_eq!(test.generator.calls(), 0);
    Ok(())
}

async fn wait_for_cached_response(test: &TestApp, workspace: &str) -> bool {
    let Some(cache) = test.app.rag.cache() else {
        return false;
    };
    for _ in 0..100 {
        if cache.stats(workspace).await.response_entries > 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_stream_frames_and_cache_write() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    let frames: Vec<StreamFrame> = rag
        .query_stream("How does rust async work?", &options())?
        .collect()
        .await;

    // Empty chunks are skipped: three tokens, then the terminal frame
    assert_eq!(frames.len(), 4);
    assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
    assert!(frames[3].is_terminal());

    let answer: String = frames
        .iter()
        .filter_map(|frame| match frame {
            StreamFrame::Token { token, .. } => Some(token.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(answer, "Rust is fast.");

    match &frames[3] {
        StreamFrame::Complete {
            done,
            stats,
            sources,
            metadata,
        } => {
            assert!(done);
            assert_eq!(stats.metrics.token_count, 3);
            assert_eq!(stats.total_response_length, "Rust is fast.".len());
            assert!(!sources.as_ref().map_or(true, Vec::is_empty));
            assert!(!metadata.as_ref().is_some_and(|m| m.cached));
        }
        other => panic!("expected complete frame, got {other:?}"),
    }

    assert!(wait_for_cached_response(&test, "greenfrog").await);
    let cached = rag.query("How does rust async work?", &options()).await?;
    assert!(cached.metadata.cached);
    assert_eq!(cached.answer, "Rust is fast.");
    assert_eq!(test.generator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stream_of_cached_answer() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;
    let first = rag.query("How does rust async work?", &options()).await?;

    let frames: Vec<StreamFrame> = rag
        .query_stream("How does rust async work?", &options())?
        .collect()
        .await;
    assert_eq!(frames.len(), 2);
    match &frames[0] {
        StreamFrame::Token { token, .. } => assert_eq!(token, &first.answer),
        other => panic!("expected token frame, got {other:?}"),
    }
    match &frames[1] {
        StreamFrame::Complete { metadata, .. } => {
            assert!(metadata.as_ref().is_some_and(|m| m.cached));
        }
        other => panic!("expected complete frame, got {other:?}"),
    }
    assert_eq!(test.generator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stream_no_context() -> Result<()> {
    let test = build_app(test_config(), Vec::new()).await?;
    let frames: Vec<StreamFrame> = test
        .app
        .rag
        .query_stream("anything at all", &uncached())?
        .collect()
        .await;

    assert_eq!(frames.len(), 2);
    match &frames[1] {
        StreamFrame::Complete { metadata, sources, .. } => {
            assert!(metadata.as_ref().is_some_and(|m| m.no_context_found));
            assert!(sources.as_ref().is_some_and(Vec::is_empty));
        }
        other => panic!("expected complete frame, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_stream_validation_happens_before_streaming() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    assert!(matches!(rag.query_stream("", &options()), Err(ref e) if e.is_validation()));
    let bad_workspace = QueryOptions {
        workspace: "has space".to_string(),
        ..options()
    };
    assert!(matches!(
        rag.query_stream("rust", &bad_workspace),
        Err(ref e) if e.is_validation()
    ));
    assert_eq!(rag.stats(None).await.streams, 0);
    Ok(())
}

#[tokio::test]
async fn test_stream_generation_failure_single_error_frame() -> Result<()> {
    let test = build_app_with(
        test_config(),
        corpus(),
        Arc::new(KeywordEmbedder),
        ScriptedGenerator::failing(),
    )
    .await?;

    let frames: Vec<StreamFrame> = test
        .app
        .rag
        .query_stream("How does rust async work?", &options())?
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], StreamFrame::Error { done: true, .. }));
    assert_eq!(test.app.rag.stats(None).await.failures, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalidate_workspace() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let rag = &test.app.rag;

    rag.query("How does rust async work?", &options()).await?;
    let removed = rag.invalidate_cache("greenfrog", None).await?;
    assert_eq!(removed, 3);

    let response = rag.query("How does rust async work?", &options()).await?;
    assert!(!response.metadata.cached);
    assert_eq!(test.generator.calls(), 2);

    assert!(rag.invalidate_cache("bad*ws", None).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_health_and_stats() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let report = test.app.rag.health_check().await;
    assert!(report.healthy);
    assert_eq!(report.cache, Some(true));
    assert_eq!(report.rerank, Some(true));

    let stats = test.app.rag.stats(None).await;
    assert_eq!(stats.rerank_strategy, "score-based");
    assert!(stats.use_cache);
    let retrieval = stats.retrieval.expect("retrieval info");
    assert_eq!(retrieval.collection.count, 4);
    // The health check loaded the keyword corpus
    assert_eq!(retrieval.keyword_corpus_size, Some(4));

    assert_eq!(test.app.rag.reload_documents().await?, 4);

    let failing = build_app_with(
        test_config(),
        corpus(),
        Arc::new(KeywordEmbedder),
        ScriptedGenerator::failing(),
    )
    .await?;
    let report = failing.app.rag.health_check().await;
    assert!(!report.healthy);
    assert!(!report.generation);
    assert!(report.retrieval);
    Ok(())
}

#[tokio::test]
async fn test_empty_answer_is_not_cached() -> Result<()> {
    let test = build_app_with(
        test_config(),
        corpus(),
        Arc::new(KeywordEmbedder),
        ScriptedGenerator::with_script(Script::Empty),
    )
    .await?;
    let rag = &test.app.rag;

    let first = rag.query("How does rust async work?", &options()).await?;
    assert!(first.answer.is_empty());
    assert!(!first.metadata.no_context_found);
    let second = rag.query("How does rust async work?", &options()).await?;
    assert!(!second.metadata.cached);
    assert_eq!(test.generator.calls(), 2);

    // Streaming an empty answer yields only the terminal frame
    let frames: Vec<StreamFrame> = rag
        .query_stream("How does rust async work?", &options())?
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        StreamFrame::Complete { stats, .. } => {
            assert_eq!(stats.metrics.token_count, 0);
            assert_eq!(stats.total_response_length, 0);
        }
        other => panic!("expected complete frame, got {other:?}"),
    }

    assert!(!wait_for_cached_response(&test, "greenfrog").await);
    assert!(test.store.is_empty());
    assert_eq!(test.generator.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_slow_generation_times_out() -> Result<()> {
    let mut config = test_config();
    config.server.request_timeout_secs = 1;
    let test = build_app_with(
        config,
        corpus(),
        Arc::new(KeywordEmbedder),
        ScriptedGenerator::with_script(Script::Slow(Duration::from_secs(5))),
    )
    .await?;

    let started = std::time::Instant::now();
    let err = test
        .app
        .rag
        .query("How does rust async work?", &options())
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(matches!(err, RagError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(test.app.rag.stats(None).await.failures, 1);
    assert!(test.store.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_reload_swaps_keyword_corpus_atomically() -> Result<()> {
    let index = Arc::new(seeded_index(corpus()).await?);
    let retriever = Arc::new(HybridRetriever::new(
        Arc::clone(&index) as Arc<dyn VectorIndex>,
        Arc::new(KeywordEmbedder),
        test_config().retrieval,
    ));
    assert_eq!(retriever.load_documents(false).await?, 4);

    let extra = IndexRecord {
        id: "doc-extra".to_string(),
        text: "Rust runtimes for embedded targets".to_string(),
        metadata: ragserve::models::Metadata::new(),
    };
    let vector = KeywordEmbedder.embed(&extra.text).await?;
    index.upsert(extra, vector)?;

    // The loaded corpus is kept until a forced reload
    let ids = |docs: Vec<ragserve::models::Document>| -> Vec<String> {
        let mut ids: Vec<String> = docs.into_iter().map(|d| d.id).collect();
        ids.sort();
        ids
    };
    let old = vec!["doc-rust".to_string()];
    let new = vec!["doc-extra".to_string(), "doc-rust".to_string()];
    assert_eq!(ids(retriever.keyword_search("runtimes", 10).await?), old);

    let reloading = {
        let retriever = Arc::clone(&retriever);
        tokio::spawn(async move {
            let mut size = 0;
            for _ in 0..20 {
                size = retriever.load_documents(true).await?;
            }
            Ok::<usize, RagError>(size)
        })
    };

    for _ in 0..200 {
        let seen = ids(retriever.keyword_search("runtimes", 10).await?);
        assert!(seen == old || seen == new, "mixed corpus: {seen:?}");
        tokio::task::yield_now().await;
    }

    let size = reloading.await.expect("reload task")?;
    assert_eq!(size, 5);
    assert_eq!(ids(retriever.keyword_search("runtimes", 10).await?), new);
    Ok(())
}

#[tokio::test]
async fn test_huge_k_does_not_overflow() -> Result<()> {
    let test = build_app(test_config(), corpus()).await?;
    let options = QueryOptions {
        k: usize::MAX,
        ..uncached()
    };
    let response = test
        .app
        .rag
        .query("How does rust async work?", &options)
        .await?;
    assert!(response.metadata.source_count > 0);
    assert!(response.metadata.source_count <= 4);
    assert_eq!(response.sources.len(), response.metadata.source_count);
    Ok(())
}

#[tokio::test]
async fn test_sources_match_context_budget() -> Result<()> {
    let mut config = test_config();
    // 60 tokens leave 120 chars of context: room for one entry
    config.pipeline.context_limits = vec![ModelContextLimit {
        model: "test-model".to_string(),
        tokens: 60,
    }];
    let test = build_app(config, corpus()).await?;

    let response = test
        .app
        .rag
        .query("How does rust async work?", &uncached())
        .await?;
    assert!(!response.metadata.no_context_found);
    assert_eq!(response.metadata.source_count, 1);
    assert_eq!(response.sources.len(), 1);
    assert!(response.metadata.context_length <= 120);
    Ok(())
}
