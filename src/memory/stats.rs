use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::memory::types::ItemKind;

/// Item counts for one kind.
#[derive(Debug, Default, Serialize)]
pub struct KindCounts {
    pub active: u64,
    pub archived: u64,
    /// Active items with NULL strength.
    pub pinned: u64,
    /// Mean strength of active, unpinned items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_strength: Option<f64>,
}

/// Response from `stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_items: u64,
    pub active_items: u64,
    pub by_kind: BTreeMap<String, KindCounts>,
    pub associations: u64,
    pub associations_by_relation: BTreeMap<String, u64>,
    pub embeddings: u64,
    pub probable_duplicates: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay_cursor: Option<usize>,
}

/// Compute memory store statistics.
///
/// `db_path` is used for file size; pass None for in-memory databases.
pub fn memory_stats(conn: &Connection, db_path: Option<&Path>) -> Result<StatsResponse> {
    let mut by_kind = BTreeMap::new();
    let (mut total_items, mut active_items) = (0u64, 0u64);
    for kind in ItemKind::ALL {
        let counts = count_kind(conn, kind)?;
        total_items += counts.active + counts.archived;
        active_items += counts.active;
        by_kind.insert(kind.to_string(), counts);
    }

    let associations_by_relation = count_by_relation(conn)?;
    let associations = associations_by_relation.values().sum();
    let embeddings = count(conn, "SELECT COUNT(*) FROM embeddings")?;
    let probable_duplicates = count(conn, "SELECT COUNT(*) FROM probable_duplicates")?;
    let decay_cursor = crate::db::migrations::get_meta(conn, "decay_cursor")?
        .and_then(|v| v.parse().ok());

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_items,
        active_items,
        by_kind,
        associations,
        associations_by_relation,
        embeddings,
        probable_duplicates,
        db_size_bytes,
        decay_cursor,
    })
}

fn count_kind(conn: &Connection, kind: ItemKind) -> Result<KindCounts> {
    let table = kind.spec().table;
    let counts = conn.query_row(
        &format!(
            "SELECT \
             COALESCE(SUM(archived_at IS NULL), 0), \
             COALESCE(SUM(archived_at IS NOT NULL), 0), \
             COALESCE(SUM(archived_at IS NULL AND memory_strength IS NULL), 0), \
             AVG(CASE WHEN archived_at IS NULL THEN memory_strength END) \
             FROM {table}"
        ),
        [],
        |row| {
            Ok(KindCounts {
                active: row.get::<_, i64>(0)? as u64,
                archived: row.get::<_, i64>(1)? as u64,
                pinned: row.get::<_, i64>(2)? as u64,
                mean_strength: row.get(3)?,
            })
        },
    )?;
    Ok(counts)
}

fn count_by_relation(conn: &Connection) -> Result<BTreeMap<String, u64>> {
    let mut map: BTreeMap<String, u64> = ["same-session", "temporal", "same-file", "semantic"]
        .into_iter()
        .map(|r| (r.to_string(), 0))
        .collect();

    let mut stmt = conn.prepare("SELECT relation, COUNT(*) FROM associations GROUP BY relation")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (relation, n) in rows {
        map.insert(relation, n as u64);
    }
    Ok(map)
}

fn count(conn: &Connection, sql: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}
