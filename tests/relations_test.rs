mod helpers;

use helpers::test_db;
use mnemos::config::MnemosConfig;
use mnemos::db;
use mnemos::engine::{MemoryEngine, RelatedTarget};
use mnemos::memory::types::{ItemKind, NewDecision, NewError, NewItem, NewLearning, NewNote};
use tempfile::TempDir;

/// Defaults with the temporal rule off, so only session and file links form.
fn config() -> MnemosConfig {
    let mut config = MnemosConfig::default();
    config.association.temporal_limit = 0;
    config
}

fn engine() -> MemoryEngine {
    MemoryEngine::with_connection(test_db(), None, config())
}

fn decision(title: &str, files: &[&str]) -> NewItem {
    NewItem::Decision(NewDecision {
        title: title.into(),
        description: format!("{title} details"),
        files: files.iter().map(|f| f.to_string()).collect(),
        ..Default::default()
    })
}

fn error(message: &str, files: &[&str]) -> NewItem {
    NewItem::Error(NewError {
        message: message.into(),
        files: files.iter().map(|f| f.to_string()).collect(),
        ..Default::default()
    })
}

fn learning(title: &str) -> NewItem {
    NewItem::Learning(NewLearning {
        title: title.into(),
        description: format!("{title} details"),
        ..Default::default()
    })
}

#[test]
fn items_in_one_session_are_linked() {
    let engine = engine();
    engine.start_session("s1", Some("mnemos")).unwrap();

    let d = engine.store_item(decision("Use WAL mode", &[]), Some("s1")).unwrap();
    let e = engine.store_item(error("database is locked", &[]), Some("s1")).unwrap();
    let n = engine
        .store_item(
            NewItem::Note(NewNote {
                title: "Check busy timeout".into(),
                content: "5s is enough".into(),
                ..Default::default()
            }),
            Some("s1"),
        )
        .unwrap();
    assert_eq!(d.associations, 0);
    assert_eq!(e.associations, 1);
    assert_eq!(n.associations, 2);

    let stats = engine.stats().unwrap();
    assert_eq!(stats.associations_by_relation.get("same-session"), Some(&3));

    let related = engine
        .related_to(RelatedTarget::Seeds(vec![d.item.clone()]))
        .unwrap();
    assert_eq!(related.len(), 2);
    assert_eq!(related[0].item, e.item);
    assert_eq!(related[1].item, n.item);
    for r in &related {
        assert!((r.activation - 0.3).abs() < 1e-9, "{} got {}", r.item, r.activation);
    }
}

#[test]
fn sessions_do_not_leak_into_each_other() {
    let engine = engine();
    let a = engine.store_item(decision("Alpha", &[]), Some("s1")).unwrap();
    let b = engine.store_item(decision("Beta", &[]), Some("s2")).unwrap();
    assert_eq!(b.associations, 0);

    let related = engine.related_to(RelatedTarget::Seeds(vec![a.item])).unwrap();
    assert!(related.is_empty());
}

#[test]
fn files_seed_activation_through_session_links() {
    let engine = engine();
    engine
        .store_item(decision("Pool connections", &["src/db.rs"]), Some("s2"))
        .unwrap();
    let e = engine.store_item(error("too many open files", &["src/db.rs"]), None).unwrap();
    assert_eq!(e.associations, 1, "same-file link to the decision");
    let l = engine.store_item(learning("Close statements early"), Some("s2")).unwrap();

    let related = engine
        .related_to(RelatedTarget::Files(vec!["src/db.rs".into()]))
        .unwrap();
    // Both file items are seeds; the learning is one hop from the decision.
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].item, l.item);
    assert!((related[0].activation - 0.3).abs() < 1e-9);

    let unrelated = engine
        .related_to(RelatedTarget::Files(vec!["src/main.rs".into()]))
        .unwrap();
    assert!(unrelated.is_empty());
}

#[test]
fn archived_items_are_not_returned() {
    let engine = engine();
    let d = engine.store_item(decision("Keep", &[]), Some("s3")).unwrap();
    let l = engine.store_item(learning("Obsolete advice"), Some("s3")).unwrap();

    assert!(engine.archive_item(&l.item).unwrap());
    assert!(!engine.archive_item(&l.item).unwrap(), "second archive is a no-op");

    let related = engine.related_to(RelatedTarget::Seeds(vec![d.item])).unwrap();
    assert!(related.is_empty());
    assert!(engine.get_item(&l.item).unwrap().is_none());
}

#[test]
fn related_marks_traversed_edges() {
    let tmp = TempDir::new().unwrap();
    let mut config = config();
    config.storage.db_path = tmp.path().join("memory.db").to_string_lossy().into_owned();
    let engine = MemoryEngine::open(config.clone()).unwrap();

    let d = engine.store_item(decision("Seed", &[]), Some("s4")).unwrap();
    engine.store_item(learning("Neighbor"), Some("s4")).unwrap();
    engine.store_item(learning("Unvisited"), Some("s5")).unwrap();

    engine.related_to(RelatedTarget::Seeds(vec![d.item])).unwrap();

    let conn = db::open_database(config.resolved_db_path()).unwrap();
    let marked: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM associations WHERE last_activated IS NOT NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(marked, 1);
    let kinds: Vec<String> = conn
        .prepare("SELECT source_type FROM associations")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(kinds, vec![ItemKind::Learning.as_str().to_string()]);
}
