//! SQL DDL for all mnemos tables.
//!
//! Six item tables (`decisions`, `errors`, `learnings`, `notes`, `unfinished`,
//! `sessions`) with one external-content FTS5 index each, plus `associations`,
//! `embeddings`, `probable_duplicates`, `memory_log` and `schema_meta`. The
//! `memory_vec` vec0 table is created separately and is optional. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.
//!
//! Indexes on the memory columns live in the v2 migration, because a legacy
//! store may still lack those columns when this DDL runs.

use rusqlite::Connection;

/// All schema DDL statements for the core tables.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    project TEXT,
    summary TEXT,
    ended_at TEXT,
    created_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    memory_strength REAL DEFAULT 1.0,
    importance_score REAL NOT NULL DEFAULT 0.5,
    archived_at TEXT
);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    rationale TEXT,
    alternatives TEXT,
    files TEXT,
    tags TEXT,
    priority TEXT,
    created_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    memory_strength REAL DEFAULT 1.0,
    importance_score REAL NOT NULL DEFAULT 0.5,
    archived_at TEXT
);

CREATE TABLE IF NOT EXISTS errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    error_type TEXT,
    message TEXT NOT NULL,
    solution TEXT,
    context TEXT,
    files TEXT,
    severity TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT,
    occurrences INTEGER NOT NULL DEFAULT 1,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    memory_strength REAL DEFAULT 1.0,
    importance_score REAL NOT NULL DEFAULT 0.5,
    archived_at TEXT
);

CREATE TABLE IF NOT EXISTS learnings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    correct_approach TEXT,
    severity TEXT,
    auto_block INTEGER NOT NULL DEFAULT 0,
    core_memory INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    memory_strength REAL DEFAULT 1.0,
    importance_score REAL NOT NULL DEFAULT 0.5,
    archived_at TEXT
);

CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT,
    priority TEXT,
    created_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    memory_strength REAL DEFAULT 1.0,
    importance_score REAL NOT NULL DEFAULT 0.5,
    archived_at TEXT
);

CREATE TABLE IF NOT EXISTS unfinished (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    description TEXT NOT NULL,
    context TEXT,
    priority TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    memory_strength REAL DEFAULT 1.0,
    importance_score REAL NOT NULL DEFAULT 0.5,
    archived_at TEXT
);

-- Full-text search (BM25), one external-content index per item table
CREATE VIRTUAL TABLE IF NOT EXISTS decisions_fts USING fts5(
    title, description, rationale, content='decisions', content_rowid='id'
);
CREATE VIRTUAL TABLE IF NOT EXISTS errors_fts USING fts5(
    message, error_type, solution, context, content='errors', content_rowid='id'
);
CREATE VIRTUAL TABLE IF NOT EXISTS learnings_fts USING fts5(
    title, description, correct_approach, content='learnings', content_rowid='id'
);
CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
    title, content, content='notes', content_rowid='id'
);
CREATE VIRTUAL TABLE IF NOT EXISTS unfinished_fts USING fts5(
    description, context, content='unfinished', content_rowid='id'
);
CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(
    summary, project, content='sessions', content_rowid='rowid'
);

-- Association graph
CREATE TABLE IF NOT EXISTS associations (
    source_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relation TEXT NOT NULL CHECK(relation IN ('same-session','temporal','same-file','semantic')),
    strength REAL NOT NULL CHECK(strength >= 0.0 AND strength <= 1.0),
    last_activated TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_type, source_id, target_type, target_id, relation),
    CHECK(NOT(source_type = target_type AND source_id = target_id))
);

CREATE INDEX IF NOT EXISTS idx_assoc_source ON associations(source_type, source_id);
CREATE INDEX IF NOT EXISTS idx_assoc_target ON associations(target_type, target_id);

-- Embedding vectors (canonical copy, used for brute-force similarity)
CREATE TABLE IF NOT EXISTS embeddings (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    vector BLOB NOT NULL,
    model_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id)
);

-- Near-duplicate pairs flagged by the semantic pass
CREATE TABLE IF NOT EXISTS probable_duplicates (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    duplicate_type TEXT NOT NULL,
    duplicate_id TEXT NOT NULL,
    similarity REAL NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, duplicate_type, duplicate_id)
);

-- Audit log
CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','update','archive','decay','prune','session')),
    target TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memory_vec USING vec0(
    item_key TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
///
/// The vec0 table is best effort: without sqlite-vec the store still works and
/// similarity falls back to a brute-force scan over `embeddings`.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    if let Err(e) = conn.execute_batch(VEC_TABLE_SQL) {
        tracing::warn!(error = %e, "vec0 table unavailable, vector search will use brute force");
    }

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
