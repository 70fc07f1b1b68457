#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::FakeEmbedder;
use serde_json::json;
use sqlgate::cache::{Distance, SemanticCache, VectorStore, DEFAULT_THRESHOLD};

fn embedder() -> FakeEmbedder {
    FakeEmbedder::new()
        .with("films from 2006", vec![1.0, 0.0, 0.0])
        .with("movies from 2006", vec![1.0, 0.3, 0.0])
        .with("films from 2007", vec![1.0, 0.5, 0.0])
        .with("list actors", vec![0.0, 0.0, 1.0])
}

fn cache(embedder: Arc<FakeEmbedder>) -> SemanticCache {
    SemanticCache::new(embedder, VectorStore::open_in_memory().unwrap())
}

#[tokio::test]
async fn test_empty_cache_misses() {
    let cache = cache(Arc::new(embedder()));
    assert_eq!(cache.threshold(), DEFAULT_THRESHOLD);
    assert!(cache.lookup("films from 2006").await.is_none());
}

#[tokio::test]
async fn test_near_question_hits() {
    let cache = cache(Arc::new(embedder()));
    assert!(cache.record("films from 2006", "SELECT title FROM film WHERE release_year = 2006").await);

    // Squared distance 0.09.
    let search = cache.search("movies from 2006").await;
    let hit = search.hit.unwrap();
    assert_eq!(hit.question, "films from 2006");
    assert_eq!(hit.sql, "SELECT title FROM film WHERE release_year = 2006");
    assert!((hit.distance - 0.09).abs() < 1e-6);

    assert_eq!(
        cache.lookup("films from 2006").await.as_deref(),
        Some("SELECT title FROM film WHERE release_year = 2006")
    );
}

#[tokio::test]
async fn test_distant_question_misses() {
    let cache = cache(Arc::new(embedder()));
    cache.record("films from 2006", "SELECT 1").await;

    // Squared distance 0.25 is past the 0.2 threshold.
    assert!(cache.lookup("films from 2007").await.is_none());
    assert!(cache.lookup("list actors").await.is_none());
}

#[tokio::test]
async fn test_threshold_is_configurable() {
    let cache = cache(Arc::new(embedder())).with_threshold(0.3);
    cache.record("films from 2006", "SELECT 1").await;
    assert_eq!(cache.lookup("films from 2007").await.as_deref(), Some("SELECT 1"));
}

#[tokio::test]
async fn test_cosine_metric() {
    let embedder = FakeEmbedder::new()
        .with("a", vec![1.0, 0.0])
        .with("a, louder", vec![10.0, 0.0])
        .with("b", vec![0.0, 1.0]);
    let cache = cache(Arc::new(embedder)).with_metric(Distance::Cosine);
    cache.record("a", "SELECT 'a'").await;

    assert_eq!(cache.lookup("a, louder").await.as_deref(), Some("SELECT 'a'"));
    assert!(cache.lookup("b").await.is_none());
}

#[tokio::test]
async fn test_record_is_idempotent_per_question() {
    let cache = cache(Arc::new(embedder()));
    cache.record("films from 2006", "SELECT 1").await;
    cache.record("films from 2006", "SELECT 2").await;

    assert_eq!(cache.count().unwrap(), 1);
    assert_eq!(cache.lookup("films from 2006").await.as_deref(), Some("SELECT 2"));
}

#[tokio::test]
async fn test_record_search_reuses_embedding_and_keeps_params() {
    let embedder = Arc::new(embedder());
    let cache = cache(embedder.clone());

    let search = cache.search("films from 2006").await;
    assert!(search.hit.is_none());
    assert!(cache.record_search(
        &search,
        "films from 2006",
        "SELECT title FROM film WHERE release_year = $1",
        &[json!(2006)],
    ));
    assert_eq!(embedder.call_count(), 1);

    let hit = cache.search("movies from 2006").await.hit.unwrap();
    assert_eq!(hit.params, vec![json!(2006)]);
}

#[tokio::test]
async fn test_embedding_failure_is_a_miss_and_records_nothing() {
    let cache = cache(Arc::new(embedder()));
    cache.record("films from 2006", "SELECT 1").await;

    let search = cache.search("never seen").await;
    assert!(search.embedding.is_none());
    assert!(search.hit.is_none());

    assert!(!cache.record("never seen", "SELECT 2").await);
    assert!(!cache.record_search(&search, "never seen", "SELECT 2", &[]));
    assert_eq!(cache.count().unwrap(), 1);
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let embedder = Arc::new(embedder());

    {
        let cache = SemanticCache::new(embedder.clone(), VectorStore::open(&path).unwrap());
        cache.record("films from 2006", "SELECT 1").await;
    }

    let reopened = SemanticCache::new(embedder, VectorStore::open(&path).unwrap());
    assert_eq!(reopened.lookup("movies from 2006").await.as_deref(), Some("SELECT 1"));

    let entries = reopened.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].question, "films from 2006");

    assert_eq!(reopened.clear().unwrap(), 1);
    assert!(reopened.lookup("films from 2006").await.is_none());
}
