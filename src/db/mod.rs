pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Once;

use crate::memory::types::ItemKind;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the mnemos database at the given path, with all extensions
/// loaded, schema initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL: concurrent readers, one writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database with schema and migrations applied.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Column names of `table`, empty if the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(columns)
}

/// Whether the sqlite-vec KNN index is usable on this connection.
pub fn vector_index_available(conn: &Connection) -> bool {
    let version = conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0));
    let table = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = 'memory_vec'",
        [],
        |row| row.get::<_, i64>(0),
    );
    matches!((version, table), (Ok(_), Ok(n)) if n > 0)
}

/// Result of [`check_database_health`].
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_vec_version: Option<String>,
    pub item_count: u64,
    pub association_count: u64,
    pub embedding_count: u64,
}

/// Run an integrity check and gather basic counts.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let schema_version = migrations::get_schema_version(conn)?;
    let sqlite_vec_version = conn
        .query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
        .ok();

    let mut item_count = 0u64;
    for kind in ItemKind::ALL {
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.spec().table),
            [],
            |row| row.get(0),
        )?;
        item_count += n as u64;
    }
    let association_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM associations", [], |row| row.get(0))?;
    let embedding_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

    Ok(HealthReport {
        integrity_ok: integrity == "ok",
        schema_version,
        sqlite_vec_version,
        item_count,
        association_count: association_count as u64,
        embedding_count: embedding_count as u64,
    })
}
