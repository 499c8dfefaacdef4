//! Integration tests for the ingest and retrieval pipeline.
//!
//! Every test runs against a private in-memory index (or a temp file when
//! reopening matters) with a deterministic embedding provider, so no model
//! download or network access is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rusqlite::Connection;

use convoindex::config::LocalEmbeddingConfig;
use convoindex::pipeline::{
    padding_is_zero, ConversationIndex, ConversationMeta, DistanceMetric, EmbeddingProvider,
    IndexSettings, LocalEmbeddingProvider, LocalModel, Message, PipelineError, PipelineResult,
};

// ============================================================================
// Test providers
// ============================================================================

/// Counts letters a, b and c. Cheap, deterministic and easy to reason about.
struct LetterProvider {
    texts_embedded: AtomicUsize,
    fail_on: Option<&'static str>,
}

impl LetterProvider {
    fn new() -> Self {
        Self {
            texts_embedded: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    fn failing_on(marker: &'static str) -> Self {
        Self {
            texts_embedded: AtomicUsize::new(0),
            fail_on: Some(marker),
        }
    }

    fn embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for LetterProvider {
    async fn embed_batch(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            if let Some(marker) = self.fail_on {
                if text.contains(marker) {
                    return Err(PipelineError::ProviderUnavailable(
                        "provider went away".to_string(),
                    ));
                }
            }
            self.texts_embedded.fetch_add(1, Ordering::SeqCst);
            let count = |c: char| text.chars().filter(|&x| x == c).count() as f32;
            out.push(vec![count('a'), count('b'), count('c')]);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        "letters-v1"
    }

    fn dimensions(&self) -> usize {
        3
    }
}

fn settings(target_width: usize, chunk_max_chars: usize) -> IndexSettings {
    IndexSettings {
        target_width,
        metric: DistanceMetric::Cosine,
        chunk_max_chars,
        cache_embeddings: true,
    }
}

fn meta(title: &str) -> ConversationMeta {
    ConversationMeta {
        scenario_title: title.to_string(),
        original_title: Some(format!("{title} (original)")),
        source_url: None,
        created_at: None,
    }
}

fn user(text: &str) -> Message {
    Message::new("alice", "user", text)
}

fn local_index(native: usize, target: usize, chunk_max_chars: usize) -> ConversationIndex {
    let model = LocalModel::load(&LocalEmbeddingConfig { dimensions: native }).unwrap();
    let provider = Arc::new(LocalEmbeddingProvider::new(Arc::new(model)));
    ConversationIndex::open_in_memory(settings(target, chunk_max_chars), provider).unwrap()
}

// ============================================================================
// Ingest
// ============================================================================

#[tokio::test]
async fn ingest_stores_conversation_and_padded_chunks() {
    let index = local_index(16, 32, 2000);
    let messages = vec![
        user("How do I stop my integration tests from flaking?"),
        Message::new("bot", "assistant", "Pin the clock and isolate the database."),
    ];

    let id = index.ingest(meta("Flaky tests"), &messages).await.unwrap();

    let (record, chunks) = index.get_conversation(&id).unwrap().unwrap();
    assert_eq!(record.scenario_title, "Flaky tests");
    assert_eq!(record.chunk_count, 1);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].first_message, 0);
    assert_eq!(chunks[0].last_message, 1);
    assert_eq!(
        chunks[0].text,
        "How do I stop my integration tests from flaking?\nPin the clock and isolate the database."
    );

    let vectors = index.chunk_embeddings(&id).unwrap();
    assert_eq!(vectors.len(), 1);
    assert_eq!(vectors[0].len(), 32);
    assert!(padding_is_zero(&vectors[0], 16));
}

#[tokio::test]
async fn oversized_message_gets_its_own_chunk() {
    let index = local_index(16, 16, 10);
    let messages = vec![user("hello"), user("this message is far longer than ten")];

    let id = index.ingest(meta("Budget"), &messages).await.unwrap();

    let (record, chunks) = index.get_conversation(&id).unwrap().unwrap();
    assert_eq!(record.chunk_count, 2);
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "this message is far longer than ten"]);
    assert_eq!(chunks[1].ordinal, 1);
    assert_eq!(chunks[1].first_message, 1);
    assert_eq!(chunks[1].last_message, 1);
}

#[tokio::test]
async fn empty_conversation_is_rejected_without_writes() {
    let index = local_index(8, 8, 100);

    let err = index.ingest(meta("Nothing"), &[]).await.unwrap_err();
    assert!(matches!(err, PipelineError::EmptyConversation));

    let stats = index.stats().unwrap();
    assert_eq!(stats.conversations, 0);
    assert_eq!(stats.chunks, 0);
}

#[tokio::test]
async fn whitespace_only_chunk_is_rejected() {
    let index = local_index(8, 8, 100);
    let err = index
        .ingest(meta("Blank"), &[user("   "), user("\n")])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(index.stats().unwrap().conversations, 0);
}

#[tokio::test]
async fn invalid_metadata_is_rejected() {
    let index = local_index(8, 8, 100);
    let mut bad = meta("No identity");
    bad.original_title = None;

    let err = index.ingest(bad, &[user("hi")]).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
}

#[tokio::test]
async fn provider_failure_midway_leaves_no_rows() {
    let provider = Arc::new(LetterProvider::failing_on("boom"));
    let index = ConversationIndex::open_in_memory(settings(8, 10), provider).unwrap();

    let messages = vec![user("abc abc"), user("boom boom"), user("cab cab")];
    let err = index.ingest(meta("Atomic"), &messages).await.unwrap_err();
    assert!(matches!(err, PipelineError::ProviderUnavailable(_)));

    let stats = index.stats().unwrap();
    assert_eq!(stats.conversations, 0);
    assert_eq!(stats.chunks, 0);
    assert_eq!(stats.cached_embeddings, 0);
}

#[tokio::test]
async fn native_wider_than_target_is_a_dimension_mismatch() {
    let index = local_index(16, 8, 100);
    let err = index.ingest(meta("Too wide"), &[user("hello")]).await.unwrap_err();
    match err {
        PipelineError::DimensionMismatch { native, target } => {
            assert_eq!(native, 16);
            assert_eq!(target, 8);
        }
        other => panic!("expected DimensionMismatch, got {other:?}"),
    }
    assert_eq!(index.stats().unwrap().conversations, 0);
}

#[tokio::test]
async fn repeated_chunks_are_served_from_cache() {
    let provider = Arc::new(LetterProvider::new());
    let index = ConversationIndex::open_in_memory(settings(4, 10), provider.clone()).unwrap();
    let messages = vec![user("aaa bbb"), user("ccc aaa")];

    index.ingest(meta("First"), &messages).await.unwrap();
    assert_eq!(provider.embedded(), 2);

    index.ingest(meta("Second"), &messages).await.unwrap();
    assert_eq!(provider.embedded(), 2);

    let stats = index.stats().unwrap();
    assert_eq!(stats.conversations, 2);
    assert_eq!(stats.chunks, 4);
    assert_eq!(stats.cached_embeddings, 2);
}

#[tokio::test]
async fn duplicate_chunks_in_one_conversation_embed_once() {
    let provider = Arc::new(LetterProvider::new());
    let index = ConversationIndex::open_in_memory(settings(4, 5), provider.clone()).unwrap();

    index
        .ingest(meta("Echo"), &[user("abcab"), user("abcab"), user("cccc")])
        .await
        .unwrap();
    assert_eq!(provider.embedded(), 2);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn search_rejects_bad_arguments() {
    let index = local_index(8, 8, 100);

    let err = index.search("", 5).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));

    let err = index.search("   ", 5).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));

    let err = index.search("hello", 0).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));

    let err = index.search("hello", -3).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[tokio::test]
async fn search_on_empty_index_returns_nothing() {
    let index = local_index(8, 8, 100);
    assert!(index.search("anything", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn large_top_k_returns_every_chunk_in_ascending_order() {
    let provider = Arc::new(LetterProvider::new());
    let index = ConversationIndex::open_in_memory(settings(4, 8), provider).unwrap();

    let messages = vec![user("aaaaaaa"), user("bbbbbbb"), user("aaabbbb")];
    let id = index.ingest(meta("Letters"), &messages).await.unwrap();

    let results = index.search("aaaa", 1000).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results
        .windows(2)
        .all(|pair| pair[0].distance <= pair[1].distance));

    assert_eq!(results[0].chunk.text, "aaaaaaa");
    assert!(results[0].distance.abs() < 1e-6);
    assert_eq!(results[2].chunk.text, "bbbbbbb");
    assert!(results.iter().all(|r| r.conversation.id == id));
}

#[tokio::test]
async fn top_k_limits_results() {
    let provider = Arc::new(LetterProvider::new());
    let index = ConversationIndex::open_in_memory(settings(4, 8), provider).unwrap();
    index
        .ingest(meta("Letters"), &[user("aaaaaaa"), user("bbbbbbb"), user("ccccccc")])
        .await
        .unwrap();

    let results = index.search("ccc", 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.text, "ccccccc");
}

#[tokio::test]
async fn exact_text_is_the_nearest_hit_with_local_model() {
    let index = local_index(64, 64, 60);
    index
        .ingest(
            meta("Cooking"),
            &[
                user("How long should I rest a steak after grilling it?"),
                user("Can I substitute baking soda for baking powder?"),
            ],
        )
        .await
        .unwrap();
    index
        .ingest(
            meta("Travel"),
            &[user("What documents do I need to cross the border by train?")],
        )
        .await
        .unwrap();

    let results = index
        .search("Can I substitute baking soda for baking powder?", 3)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].chunk.text,
        "Can I substitute baking soda for baking powder?"
    );
    assert_eq!(results[0].conversation.scenario_title, "Cooking");
    assert!(results[0].distance < 1e-4);
}

#[tokio::test]
async fn l2_metric_orders_by_euclidean_distance() {
    let provider = Arc::new(LetterProvider::new());
    let mut s = settings(3, 3);
    s.metric = DistanceMetric::L2;
    let index = ConversationIndex::open_in_memory(s, provider).unwrap();
    index
        .ingest(meta("Scale"), &[user("a"), user("aaa"), user("bbb")])
        .await
        .unwrap();

    let results = index.search("aa", 3).await.unwrap();
    let texts: Vec<&str> = results.iter().map(|r| r.chunk.text.as_str()).collect();
    // "a" and "aaa" are both 1.0 away from "aa"; the earlier chunk wins the tie.
    assert_eq!(texts, vec!["a", "aaa", "bbb"]);
    assert!((results[0].distance - 1.0).abs() < 1e-6);
}

// ============================================================================
// Management
// ============================================================================

#[tokio::test]
async fn delete_removes_chunks_too() {
    let index = local_index(8, 8, 5);
    let id = index
        .ingest(meta("Short lived"), &[user("one two"), user("three four")])
        .await
        .unwrap();
    assert_eq!(index.stats().unwrap().chunks, 2);

    assert!(index.delete_conversation(&id).unwrap());
    assert!(index.get_conversation(&id).unwrap().is_none());
    assert_eq!(index.stats().unwrap().chunks, 0);
    assert!(index.search("one", 5).await.unwrap().is_empty());

    assert!(!index.delete_conversation(&id).unwrap());
}

#[tokio::test]
async fn list_pages_newest_first() {
    let index = local_index(8, 8, 100);
    let mut older = meta("Older");
    older.created_at = Some("2024-01-01T00:00:00Z".parse().unwrap());
    let mut newer = meta("Newer");
    newer.created_at = Some("2025-01-01T00:00:00Z".parse().unwrap());

    index.ingest(older, &[user("first")]).await.unwrap();
    index.ingest(newer, &[user("second")]).await.unwrap();

    let page = index.list_conversations(10, 0).unwrap();
    let titles: Vec<&str> = page.iter().map(|c| c.scenario_title.as_str()).collect();
    assert_eq!(titles, vec!["Newer", "Older"]);

    let second = index.list_conversations(1, 1).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].scenario_title, "Older");
}

#[tokio::test]
async fn reopening_with_different_width_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");

    {
        let provider = Arc::new(LetterProvider::new());
        let index =
            ConversationIndex::with_connection(Connection::open(&path).unwrap(), provider, settings(8, 100))
                .unwrap();
        index.ingest(meta("Persisted"), &[user("abc")]).await.unwrap();
    }

    let provider = Arc::new(LetterProvider::new());
    let reopened = ConversationIndex::with_connection(
        Connection::open(&path).unwrap(),
        provider.clone(),
        settings(8, 100),
    )
    .unwrap();
    assert_eq!(reopened.stats().unwrap().conversations, 1);
    drop(reopened);

    let err = ConversationIndex::with_connection(
        Connection::open(&path).unwrap(),
        provider,
        settings(16, 100),
    )
    .err()
    .unwrap();
    assert!(matches!(err, PipelineError::IndexMismatch { .. }));
}

#[tokio::test]
async fn reopening_with_a_different_model_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let local = |dims: usize| -> Arc<LocalEmbeddingProvider> {
        let model = LocalModel::load(&LocalEmbeddingConfig { dimensions: dims }).unwrap();
        Arc::new(LocalEmbeddingProvider::new(Arc::new(model)))
    };

    {
        let index = ConversationIndex::with_connection(
            Connection::open(&path).unwrap(),
            local(8),
            settings(16, 100),
        )
        .unwrap();
        index
            .ingest(meta("Narrow model"), &[user("the same words")])
            .await
            .unwrap();
    }

    let err = ConversationIndex::with_connection(
        Connection::open(&path).unwrap(),
        local(16),
        settings(16, 100),
    )
    .err()
    .unwrap();
    match err {
        PipelineError::IndexMismatch { key, .. } => assert_eq!(key, "embedding_model"),
        other => panic!("expected IndexMismatch, got {other:?}"),
    }

    let reopened = ConversationIndex::with_connection(
        Connection::open(&path).unwrap(),
        local(8),
        settings(16, 100),
    )
    .unwrap();
    let results = reopened.search("the same words", 1).await.unwrap();
    assert!(results[0].distance < 1e-4);
}
