mod helpers;

use anyhow::Result;
use helpers::{test_db, test_embedding, StubEmbedder};
use mnemos::config::MnemosConfig;
use mnemos::db;
use mnemos::embedding::EmbeddingProvider;
use mnemos::engine::MemoryEngine;
use mnemos::memory::search::MatchSource;
use mnemos::memory::types::{NewItem, NewNote};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn note(title: &str) -> NewItem {
    NewItem::Note(NewNote {
        title: title.into(),
        content: format!("{title} body"),
        ..Default::default()
    })
}

/// Takes a while per call and hands out a fresh spike each time.
struct SlowEmbedder {
    calls: AtomicUsize,
}

impl EmbeddingProvider for SlowEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        std::thread::sleep(Duration::from_millis(50));
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(test_embedding(n as u16))
    }
}

/// Returns vectors the store cannot index.
struct ShortEmbedder;

impl EmbeddingProvider for ShortEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0; 128])
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn burst_larger_than_concurrency_is_fully_embedded() {
    let mut config = MnemosConfig::default();
    config.background.max_concurrency = 2;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(SlowEmbedder {
        calls: AtomicUsize::new(0),
    });
    let engine = MemoryEngine::with_connection(test_db(), Some(embedder), config);

    for i in 0..6 {
        let outcome = engine.store_item(note(&format!("Burst note {i}")), None).unwrap();
        assert!(outcome.semantic_queued);
    }
    engine.flush_background().await.unwrap();

    let queue = engine.background_stats();
    assert_eq!(queue.submitted, 6);
    assert_eq!(queue.completed, 6);
    assert_eq!(queue.failed, 0);
    assert_eq!(queue.pending, 0);
    assert_eq!(engine.stats().unwrap().embeddings, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_length_vectors_are_rejected() {
    let engine = MemoryEngine::with_connection(
        test_db(),
        Some(Arc::new(ShortEmbedder)),
        MnemosConfig::default(),
    );
    engine.store_item(note("Short vectors"), None).unwrap();
    engine.flush_background().await.unwrap();

    assert_eq!(engine.background_stats().failed, 1);
    assert_eq!(engine.stats().unwrap().embeddings, 0);

    // The query vector is rejected too; lexical results still come back.
    let hits = engine.search("short vectors", None, true).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, MatchSource::Lexical);
}

#[test]
fn maintenance_backfills_missing_embeddings() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("memory.db");

    let plain = MemoryEngine::with_connection(
        db::open_database(&path).unwrap(),
        None,
        MnemosConfig::default(),
    );
    plain.store_item(note("Written before embeddings"), None).unwrap();
    plain.store_item(note("Also written before"), None).unwrap();
    let gone = plain.store_item(note("Archived before backfill"), None).unwrap();
    plain.archive_item(&gone.item).unwrap();
    assert_eq!(plain.stats().unwrap().embeddings, 0);
    drop(plain);

    let engine = MemoryEngine::with_connection(
        db::open_database(&path).unwrap(),
        Some(StubEmbedder::new(vec![("before", test_embedding(3))])),
        MnemosConfig::default(),
    );
    let report = engine.run_maintenance(Some(1)).unwrap();
    assert_eq!(report.embedded, 2);
    assert_eq!(engine.stats().unwrap().embeddings, 2);

    // Both share a vector, so the pass links them semantically.
    assert_eq!(
        engine.stats().unwrap().associations_by_relation.get("semantic"),
        Some(&1)
    );
    assert_eq!(engine.embed_missing(100).unwrap(), 0);
}
