//! Embedding storage and nearest-neighbour lookup.
//!
//! The canonical copy of every vector lives in `embeddings`. When sqlite-vec is
//! loaded, `memory_vec` mirrors it for KNN; otherwise similarity is a brute-force
//! cosine scan over `embeddings`.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{bytes_to_embedding, embedding_to_bytes, now_timestamp};
use crate::embedding::{cosine_similarity, normalize};
use crate::memory::types::{ItemKind, ItemRef};

/// How nearest-neighbour queries are answered on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    SqliteVec,
    BruteForce,
}

impl VectorBackend {
    /// Check the connection once for a usable vec0 index.
    pub fn detect(conn: &Connection) -> Self {
        if crate::db::vector_index_available(conn) {
            Self::SqliteVec
        } else {
            tracing::warn!("sqlite-vec unavailable, using brute-force similarity");
            Self::BruteForce
        }
    }
}

/// A flagged near-duplicate pair.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicatePair {
    pub item: ItemRef,
    pub duplicate: ItemRef,
    pub similarity: f64,
    pub created_at: String,
}

/// Store (or replace) an item's embedding. The vector is normalized first.
///
/// The vec0 mirror is best effort; a failure there is logged and the canonical
/// row is kept.
pub fn store_embedding(
    conn: &Connection,
    item: &ItemRef,
    embedding: &[f32],
    model_id: &str,
    backend: VectorBackend,
) -> Result<Vec<f32>> {
    let mut vector = embedding.to_vec();
    normalize(&mut vector);
    let bytes = embedding_to_bytes(&vector);

    conn.execute(
        "INSERT INTO embeddings (entity_type, entity_id, vector, model_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(entity_type, entity_id) DO UPDATE SET \
         vector = excluded.vector, model_id = excluded.model_id, created_at = excluded.created_at",
        params![item.kind.as_str(), item.id, bytes, model_id, now_timestamp()],
    )?;

    if backend == VectorBackend::SqliteVec {
        let key = item.key();
        let mirrored = conn
            .execute("DELETE FROM memory_vec WHERE item_key = ?1", params![key])
            .and_then(|_| {
                conn.execute(
                    "INSERT INTO memory_vec (item_key, embedding) VALUES (?1, ?2)",
                    params![key, bytes],
                )
            });
        if let Err(e) = mirrored {
            tracing::warn!(item = %item, error = %e, "failed to mirror embedding into vec index");
        }
    }

    Ok(vector)
}

/// Load an item's stored embedding.
pub fn load_embedding(conn: &Connection, item: &ItemRef) -> Result<Option<Vec<f32>>> {
    use rusqlite::OptionalExtension;
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            "SELECT vector FROM embeddings WHERE entity_type = ?1 AND entity_id = ?2",
            params![item.kind.as_str(), item.id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(bytes.map(|b| bytes_to_embedding(&b)))
}

/// Active items of `kind` with no stored embedding, newest first, paired with the
/// text to embed (the kind's text columns joined by newlines).
pub fn items_missing_embeddings(
    conn: &Connection,
    kind: ItemKind,
    limit: usize,
) -> Result<Vec<(ItemRef, String)>> {
    let spec = kind.spec();
    let columns = spec
        .text_columns
        .iter()
        .map(|c| format!("COALESCE(t.{c}, '')"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT CAST(t.id AS TEXT), {columns} FROM {table} t \
         WHERE t.archived_at IS NULL AND NOT EXISTS ( \
             SELECT 1 FROM embeddings e \
             WHERE e.entity_type = ?1 AND e.entity_id = CAST(t.id AS TEXT)) \
         ORDER BY t.{created} DESC LIMIT ?2",
        table = spec.table,
        created = spec.created_column,
    ))?;
    let width = spec.text_columns.len();
    let rows = stmt
        .query_map(params![kind.as_str(), limit as i64], |row| {
            let id: String = row.get(0)?;
            let mut parts = Vec::with_capacity(width);
            for i in 1..=width {
                let part: String = row.get(i)?;
                if !part.trim().is_empty() {
                    parts.push(part);
                }
            }
            Ok((ItemRef::new(kind, id), parts.join("\n")))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The `k` stored items most similar to `query`, as `(item, cosine)` pairs, best first.
///
/// Archived items are not filtered here; callers decide.
pub fn find_similar(
    conn: &Connection,
    query: &[f32],
    k: usize,
    backend: VectorBackend,
) -> Result<Vec<(ItemRef, f64)>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let mut query = query.to_vec();
    normalize(&mut query);

    if backend == VectorBackend::SqliteVec {
        match knn_search(conn, &query, k) {
            Ok(results) => return Ok(results),
            Err(e) => {
                tracing::warn!(error = %e, "vec0 KNN failed, falling back to brute force");
            }
        }
    }
    brute_force_search(conn, &query, k)
}

fn knn_search(conn: &Connection, query: &[f32], k: usize) -> Result<Vec<(ItemRef, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT item_key, distance FROM memory_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![embedding_to_bytes(query), k as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(key, distance)| {
            // Unit vectors: |a - b|² = 2 - 2·cos
            ItemRef::parse_key(&key).map(|item| (item, 1.0 - distance * distance / 2.0))
        })
        .collect())
}

fn brute_force_search(conn: &Connection, query: &[f32], k: usize) -> Result<Vec<(ItemRef, f64)>> {
    let mut stmt = conn.prepare("SELECT entity_type, entity_id, vector FROM embeddings")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut scored: Vec<(ItemRef, f64)> = rows
        .into_iter()
        .filter_map(|(kind, id, bytes)| {
            let kind: ItemKind = kind.parse().ok()?;
            let similarity = cosine_similarity(query, &bytes_to_embedding(&bytes));
            Some((ItemRef::new(kind, id), similarity))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    Ok(scored)
}

/// Record `item` and `duplicate` as a probable duplicate pair. Idempotent.
pub fn flag_probable_duplicate(
    conn: &Connection,
    item: &ItemRef,
    duplicate: &ItemRef,
    similarity: f64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO probable_duplicates \
         (entity_type, entity_id, duplicate_type, duplicate_id, similarity, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item.kind.as_str(),
            item.id,
            duplicate.kind.as_str(),
            duplicate.id,
            similarity,
            now_timestamp()
        ],
    )?;
    Ok(inserted > 0)
}

/// Duplicate pairs involving `item` in either position, most similar first.
/// The returned pair always has `item` first.
pub fn probable_duplicates(conn: &Connection, item: &ItemRef) -> Result<Vec<DuplicatePair>> {
    let mut stmt = conn.prepare(
        "SELECT duplicate_type, duplicate_id, similarity, created_at FROM probable_duplicates \
         WHERE entity_type = ?1 AND entity_id = ?2 \
         UNION ALL \
         SELECT entity_type, entity_id, similarity, created_at FROM probable_duplicates \
         WHERE duplicate_type = ?1 AND duplicate_id = ?2 \
         ORDER BY 3 DESC",
    )?;
    let rows = stmt
        .query_map(params![item.kind.as_str(), item.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(kind, id, similarity, created_at)| {
            Some(DuplicatePair {
                item: item.clone(),
                duplicate: ItemRef::new(kind.parse().ok()?, id),
                similarity,
                created_at,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::embedding::EMBEDDING_DIM;

    fn spike(index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[index] = 1.0;
        v
    }

    /// Unit vector at the given cosine from `spike(0)`, tilted toward `spike(1)`.
    fn tilted(cosine: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = cosine;
        v[1] = (1.0 - cosine * cosine).sqrt();
        v
    }

    #[test]
    fn detect_finds_sqlite_vec() {
        let conn = db::open_memory_database().unwrap();
        assert_eq!(VectorBackend::detect(&conn), VectorBackend::SqliteVec);
    }

    #[test]
    fn store_and_load_normalizes() {
        let conn = db::open_memory_database().unwrap();
        let item = ItemRef::new(ItemKind::Note, 1);
        let mut raw = spike(3);
        raw[3] = 5.0;
        store_embedding(&conn, &item, &raw, "test", VectorBackend::SqliteVec).unwrap();
        let loaded = load_embedding(&conn, &item).unwrap().unwrap();
        assert_eq!(loaded, spike(3));

        // Replacing keeps a single row in both stores
        store_embedding(&conn, &item, &spike(4), "test", VectorBackend::SqliteVec).unwrap();
        let counts: (i64, i64) = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM embeddings), (SELECT COUNT(*) FROM memory_vec)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(counts, (1, 1));
    }

    #[test]
    fn knn_and_brute_force_agree() {
        let conn = db::open_memory_database().unwrap();
        let near = ItemRef::new(ItemKind::Decision, 1);
        let far = ItemRef::new(ItemKind::Error, 2);
        store_embedding(&conn, &near, &tilted(0.9), "test", VectorBackend::SqliteVec).unwrap();
        store_embedding(&conn, &far, &spike(7), "test", VectorBackend::SqliteVec).unwrap();

        for backend in [VectorBackend::SqliteVec, VectorBackend::BruteForce] {
            let results = find_similar(&conn, &spike(0), 2, backend).unwrap();
            assert_eq!(results[0].0, near, "{backend:?}");
            assert!((results[0].1 - 0.9).abs() < 1e-4, "{backend:?}: {}", results[0].1);
            assert!(results[1].1.abs() < 1e-4, "{backend:?}");
        }
    }

    #[test]
    fn duplicates_are_listed_from_both_sides() {
        let conn = db::open_memory_database().unwrap();
        let a = ItemRef::new(ItemKind::Learning, 1);
        let b = ItemRef::new(ItemKind::Learning, 2);
        assert!(flag_probable_duplicate(&conn, &b, &a, 0.95).unwrap());
        assert!(!flag_probable_duplicate(&conn, &b, &a, 0.95).unwrap());

        let from_a = probable_duplicates(&conn, &a).unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].item, a);
        assert_eq!(from_a[0].duplicate, b);
        assert_eq!(probable_duplicates(&conn, &b).unwrap()[0].duplicate, a);
    }
}
