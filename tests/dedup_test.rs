mod helpers;

use helpers::{embedding_at, test_embedding, test_engine, StubEmbedder};
use mnemos::engine::MemoryEngine;
use mnemos::memory::types::{ItemRef, NewItem, NewLearning, NewNote};

fn learning(title: &str) -> NewItem {
    NewItem::Learning(NewLearning {
        title: title.into(),
        description: format!("{title}, noted after review"),
        ..Default::default()
    })
}

/// Store and wait for the semantic pass, so passes never race each other.
async fn store(engine: &MemoryEngine, item: NewItem) -> ItemRef {
    let outcome = engine.store_item(item, None).unwrap();
    assert!(outcome.semantic_queued);
    engine.flush_background().await.unwrap();
    outcome.item
}

fn engine() -> MemoryEngine {
    test_engine(Some(StubEmbedder::new(vec![
        ("dark mode", test_embedding(0)),
        ("dark theme", embedding_at(0, 0.95)),
        ("night palette", embedding_at(0, 0.85)),
        ("tab width", test_embedding(40)),
    ])))
}

#[tokio::test(flavor = "multi_thread")]
async fn near_identical_learnings_are_flagged() {
    let engine = engine();
    let a = store(&engine, learning("User prefers dark mode")).await;
    let b = store(&engine, learning("User prefers dark theme")).await;

    let pairs = engine.probable_duplicates(&b).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].item, b);
    assert_eq!(pairs[0].duplicate, a);
    assert!((pairs[0].similarity - 0.95).abs() < 1e-3);

    // Visible from either side
    assert_eq!(engine.probable_duplicates(&a).unwrap().len(), 1);

    // Both items stay active; flagging never merges.
    assert!(engine.get_item(&a).unwrap().is_some());
    assert!(engine.get_item(&b).unwrap().is_some());

    let stats = engine.stats().unwrap();
    assert_eq!(stats.probable_duplicates, 1);
    assert_eq!(stats.embeddings, 2);
    assert_eq!(engine.background_stats().completed, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn similar_but_not_duplicate_gets_only_a_semantic_edge() {
    let engine = engine();
    store(&engine, learning("User prefers dark mode")).await;
    let b = store(&engine, learning("User likes a night palette")).await;

    assert!(engine.probable_duplicates(&b).unwrap().is_empty());
    let stats = engine.stats().unwrap();
    assert_eq!(stats.associations_by_relation.get("semantic"), Some(&1));
}

#[tokio::test(flavor = "multi_thread")]
async fn different_kinds_are_never_duplicates() {
    let engine = engine();
    store(&engine, learning("User prefers dark mode")).await;
    let note = store(
        &engine,
        NewItem::Note(NewNote {
            title: "dark theme everywhere".into(),
            content: "applies to the terminal too".into(),
            ..Default::default()
        }),
    )
    .await;

    assert!(engine.probable_duplicates(&note).unwrap().is_empty());
    assert_eq!(
        engine.stats().unwrap().associations_by_relation.get("semantic"),
        Some(&1)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unrelated_items_are_not_linked_semantically() {
    let engine = engine();
    store(&engine, learning("User prefers dark mode")).await;
    store(&engine, learning("Tab width is four spaces")).await;

    let stats = engine.stats().unwrap();
    assert_eq!(stats.probable_duplicates, 0);
    assert_eq!(stats.associations_by_relation.get("semantic"), None);
}
