//! Association graph between memory items.
//!
//! Edges are stored directed (new item → existing item) but read as undirected.
//! Heuristic edges are created synchronously on the write path; semantic edges
//! follow once the item's embedding is available.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::BTreeSet;

use super::format_timestamp;
use super::vector::{self, VectorBackend};
use crate::config::AssociationConfig;
use crate::memory::store;
use crate::memory::types::{ItemKind, ItemRef};

/// Why two items are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    SameSession,
    Temporal,
    SameFile,
    Semantic,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameSession => "same-session",
            Self::Temporal => "temporal",
            Self::SameFile => "same-file",
            Self::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "same-session" => Ok(Self::SameSession),
            "temporal" => Ok(Self::Temporal),
            "same-file" => Ok(Self::SameFile),
            "semantic" => Ok(Self::Semantic),
            _ => Err(format!("unknown relation: {s}")),
        }
    }
}

/// One edge seen from a given item.
#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    pub item: ItemRef,
    pub relation: Relation,
    pub strength: f64,
}

/// Outcome of a semantic pass.
#[derive(Debug, Default, Serialize)]
pub struct SemanticLinks {
    pub edges: usize,
    pub duplicates: usize,
}

/// Create an edge. Returns `false` for self-loops, non-finite strengths and
/// edges that already exist. Strength is clamped to `[0, 1]`.
pub fn create_association(
    conn: &Connection,
    source: &ItemRef,
    target: &ItemRef,
    relation: Relation,
    strength: f64,
) -> Result<bool> {
    if source == target || !strength.is_finite() {
        return Ok(false);
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO associations \
         (source_type, source_id, target_type, target_id, relation, strength, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            source.kind.as_str(),
            source.id,
            target.kind.as_str(),
            target.id,
            relation.as_str(),
            strength.clamp(0.0, 1.0),
            super::now_timestamp(),
        ],
    )?;
    Ok(inserted > 0)
}

/// Every edge touching `item`, in either direction.
pub fn get_neighbors(conn: &Connection, item: &ItemRef) -> Result<Vec<Neighbor>> {
    let mut stmt = conn.prepare_cached(
        "SELECT target_type, target_id, relation, strength FROM associations \
         WHERE source_type = ?1 AND source_id = ?2 \
         UNION ALL \
         SELECT source_type, source_id, relation, strength FROM associations \
         WHERE target_type = ?1 AND target_id = ?2",
    )?;
    let rows = stmt
        .query_map(params![item.kind.as_str(), item.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut neighbors = Vec::with_capacity(rows.len());
    for (kind, id, relation, strength) in rows {
        match (kind.parse::<ItemKind>(), relation.parse::<Relation>()) {
            (Ok(kind), Ok(relation)) => neighbors.push(Neighbor {
                item: ItemRef::new(kind, id),
                relation,
                strength,
            }),
            _ => tracing::debug!(kind = %kind, relation = %relation, "skipping unrecognized edge"),
        }
    }
    Ok(neighbors)
}

/// Apply the heuristic rules to a freshly stored item. Returns the number of edges created.
///
/// All rules run in one transaction; a failing rule is logged and the rest still apply.
pub fn auto_create_associations(
    conn: &mut Connection,
    item: &ItemRef,
    session_id: Option<&str>,
    files: &[String],
    config: &AssociationConfig,
    now: DateTime<Utc>,
) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut created = 0;

    let mut apply = |rule: &str, found: Result<Vec<(ItemRef, Relation, f64)>>| match found {
        Ok(edges) => {
            for (target, relation, strength) in edges {
                match create_association(&tx, item, &target, relation, strength) {
                    Ok(true) => created += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(rule, item = %item, target = %target, error = %e, "edge insert failed")
                    }
                }
            }
        }
        Err(e) => tracing::warn!(rule, item = %item, error = %e, "association rule failed"),
    };

    if let Some(session) = session_id.filter(|s| !s.is_empty()) {
        apply("same-session", same_session_targets(&tx, item, session, config));
    }
    apply("temporal", temporal_targets(&tx, item, config, now));
    if !files.is_empty() {
        apply("same-file", same_file_targets(&tx, item, files, config));
    }

    tx.commit()?;
    if created > 0 {
        tracing::debug!(item = %item, created, "heuristic associations created");
    }
    Ok(created)
}

fn same_session_targets(
    conn: &Connection,
    item: &ItemRef,
    session: &str,
    config: &AssociationConfig,
) -> Result<Vec<(ItemRef, Relation, f64)>> {
    let mut targets = Vec::new();
    for kind in ItemKind::ALL {
        let spec = kind.spec();
        let Some(session_column) = spec.session_column else {
            continue;
        };
        let (limit, strength) = if kind == item.kind {
            (config.same_type_limit, config.same_type_strength)
        } else {
            (config.cross_type_limit, config.cross_type_strength)
        };
        let found = recent_active(
            conn,
            kind,
            &format!("{session_column} = ?"),
            vec![Value::Text(session.to_string())],
            item,
            limit,
        )?;
        targets.extend(found.into_iter().map(|t| (t, Relation::SameSession, strength)));
    }
    Ok(targets)
}

fn temporal_targets(
    conn: &Connection,
    item: &ItemRef,
    config: &AssociationConfig,
    now: DateTime<Utc>,
) -> Result<Vec<(ItemRef, Relation, f64)>> {
    let cutoff = format_timestamp(now - chrono::Duration::seconds(config.temporal_window_secs));
    let mut targets = Vec::new();
    for kind in ItemKind::ALL {
        let found = recent_active(
            conn,
            kind,
            &format!("{} >= ?", kind.spec().created_column),
            vec![Value::Text(cutoff.clone())],
            item,
            config.temporal_limit,
        )?;
        targets.extend(
            found
                .into_iter()
                .map(|t| (t, Relation::Temporal, config.temporal_strength)),
        );
    }
    Ok(targets)
}

fn same_file_targets(
    conn: &Connection,
    item: &ItemRef,
    files: &[String],
    config: &AssociationConfig,
) -> Result<Vec<(ItemRef, Relation, f64)>> {
    let wanted: BTreeSet<&str> = files.iter().map(String::as_str).collect();
    let mut candidates: Vec<(String, ItemRef)> = Vec::new();

    for kind in [ItemKind::Error, ItemKind::Decision] {
        let spec = kind.spec();
        let Some(files_column) = spec.files_column else {
            continue;
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT CAST(id AS TEXT), {files_column}, {created} FROM {table} \
             WHERE archived_at IS NULL AND {files_column} IS NOT NULL \
             ORDER BY {created} DESC, id DESC",
            created = spec.created_column,
            table = spec.table,
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (id, raw, created) in rows {
            let target = ItemRef::new(kind, id);
            if &target == item {
                continue;
            }
            let referenced: Vec<String> = match serde_json::from_str(&raw) {
                Ok(list) => list,
                Err(e) => {
                    tracing::debug!(item = %target, error = %e, "malformed files column, skipping");
                    continue;
                }
            };
            if referenced.iter().any(|f| wanted.contains(f.as_str())) {
                candidates.push((created, target));
            }
        }
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(candidates
        .into_iter()
        .take(config.same_file_limit)
        .map(|(_, t)| (t, Relation::SameFile, config.same_file_strength))
        .collect())
}

/// Most recent active items of `kind` matching `filter`, excluding `exclude`.
fn recent_active(
    conn: &Connection,
    kind: ItemKind,
    filter: &str,
    mut values: Vec<Value>,
    exclude: &ItemRef,
    limit: usize,
) -> Result<Vec<ItemRef>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let spec = kind.spec();
    let mut sql = format!(
        "SELECT CAST(id AS TEXT) FROM {table} WHERE archived_at IS NULL AND {filter}",
        table = spec.table,
    );
    if exclude.kind == kind {
        sql.push_str(" AND id != ?");
        values.push(exclude.sql_id());
    }
    sql.push_str(&format!(" ORDER BY {} DESC, rowid DESC LIMIT ?", spec.created_column));
    values.push(Value::Integer(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(|id| ItemRef::new(kind, id)).collect())
}

/// Store `item`'s embedding, link it to similar active items and flag same-kind
/// near-duplicates.
pub fn run_semantic_pass(
    conn: &mut Connection,
    item: &ItemRef,
    embedding: &[f32],
    model_id: &str,
    config: &AssociationConfig,
    dedup_threshold: f64,
    backend: VectorBackend,
) -> Result<SemanticLinks> {
    let tx = conn.transaction()?;
    let vector = vector::store_embedding(&tx, item, embedding, model_id, backend)?;
    let links = link_semantic(&tx, item, &vector, config, dedup_threshold, backend)?;
    tx.commit()?;
    tracing::debug!(item = %item, edges = links.edges, duplicates = links.duplicates, "semantic pass done");
    Ok(links)
}

/// Semantic edges for an item whose embedding is already stored.
pub fn link_semantic(
    conn: &Connection,
    item: &ItemRef,
    embedding: &[f32],
    config: &AssociationConfig,
    dedup_threshold: f64,
    backend: VectorBackend,
) -> Result<SemanticLinks> {
    let mut links = SemanticLinks::default();
    // One extra slot: the item usually finds itself first
    let similar = vector::find_similar(conn, embedding, config.semantic_candidates + 1, backend)?;
    for (other, similarity) in similar {
        if &other == item || similarity < config.semantic_threshold {
            continue;
        }
        if !store::is_active(conn, &other)? {
            continue;
        }
        if create_association(conn, item, &other, Relation::Semantic, similarity)? {
            links.edges += 1;
        }
        if other.kind == item.kind
            && similarity >= dedup_threshold
            && vector::flag_probable_duplicate(conn, item, &other, similarity)?
        {
            links.duplicates += 1;
        }
    }
    Ok(links)
}

/// Set `last_activated` on the edges between each pair, in either direction.
pub fn mark_activated(
    conn: &Connection,
    pairs: &[(ItemRef, ItemRef)],
    now: DateTime<Utc>,
) -> Result<usize> {
    let ts = format_timestamp(now);
    let mut stmt = conn.prepare_cached(
        "UPDATE associations SET last_activated = ?1 \
         WHERE (source_type = ?2 AND source_id = ?3 AND target_type = ?4 AND target_id = ?5) \
         OR (source_type = ?4 AND source_id = ?5 AND target_type = ?2 AND target_id = ?3)",
    )?;
    let mut updated = 0;
    for (a, b) in pairs {
        updated += stmt.execute(params![ts, a.kind.as_str(), a.id, b.kind.as_str(), b.id])?;
    }
    Ok(updated)
}
