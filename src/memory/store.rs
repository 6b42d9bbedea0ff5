//! Write path and direct item access.
//!
//! [`insert_item`] validates caller input, inserts the row, syncs the kind's FTS5
//! index and writes an audit entry, all in one transaction. Importance scoring,
//! association creation and embedding happen around it in [`crate::engine`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;

use super::format_timestamp;
use crate::memory::types::{Item, ItemKind, ItemRef, NewItem};

/// Caller errors, returned before anything is written.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} is missing required field `{field}`")]
    MissingField { kind: ItemKind, field: &'static str },
    #[error("item not found: {0}")]
    NotFound(ItemRef),
    #[error("session id must not be empty")]
    EmptySessionId,
}

/// Result of an insert.
#[derive(Debug, Clone, Serialize)]
pub struct InsertOutcome {
    #[serde(flatten)]
    pub item: ItemRef,
    /// `true` if an existing active error with the same message was bumped instead.
    pub deduplicated: bool,
}

/// Reject items with empty required fields.
pub fn validate(item: &NewItem) -> Result<(), StoreError> {
    for (field, value) in item.required_fields() {
        if value.trim().is_empty() {
            return Err(StoreError::MissingField {
                kind: item.kind(),
                field,
            });
        }
    }
    Ok(())
}

/// Insert a new memory item with a precomputed importance score.
///
/// Errors are deduplicated on message: a repeat of an active error bumps its
/// occurrence count and touches it rather than inserting a new row.
pub fn insert_item(
    conn: &mut Connection,
    item: &NewItem,
    session_id: Option<&str>,
    importance: f64,
    now: DateTime<Utc>,
) -> Result<InsertOutcome> {
    validate(item)?;
    let ts = format_timestamp(now);
    let tx = conn.transaction()?;

    if let NewItem::Error(e) = item {
        if let Some(existing) = bump_repeated_error(&tx, &e.message, e.solution.as_deref(), &ts)? {
            let item = ItemRef::new(ItemKind::Error, existing);
            write_audit_log(
                &tx,
                "update",
                &item,
                Some(&serde_json::json!({"reason": "repeated error"})),
            )?;
            tx.commit()?;
            return Ok(InsertOutcome {
                item,
                deduplicated: true,
            });
        }
    }

    let id = match item {
        NewItem::Decision(d) => {
            tx.execute(
                "INSERT INTO decisions (session_id, title, description, rationale, alternatives, \
                 files, tags, priority, created_at, importance_score) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session_id,
                    d.title,
                    d.description,
                    d.rationale,
                    d.alternatives,
                    json_list(&d.files)?,
                    json_list(&d.tags)?,
                    d.priority,
                    ts,
                    importance,
                ],
            )?;
            tx.last_insert_rowid()
        }
        NewItem::Error(e) => {
            tx.execute(
                "INSERT INTO errors (session_id, error_type, message, solution, context, files, \
                 severity, first_seen, last_seen, importance_score) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
                params![
                    session_id,
                    e.error_type,
                    e.message,
                    e.solution,
                    e.context,
                    json_list(&e.files)?,
                    e.severity,
                    ts,
                    importance,
                ],
            )?;
            tx.last_insert_rowid()
        }
        NewItem::Learning(l) => {
            tx.execute(
                "INSERT INTO learnings (session_id, title, description, correct_approach, severity, \
                 auto_block, core_memory, created_at, importance_score) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session_id,
                    l.title,
                    l.description,
                    l.correct_approach,
                    l.severity,
                    l.auto_block,
                    l.core_memory,
                    ts,
                    importance,
                ],
            )?;
            tx.last_insert_rowid()
        }
        NewItem::Note(n) => {
            tx.execute(
                "INSERT INTO notes (session_id, title, content, category, priority, created_at, \
                 importance_score) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![session_id, n.title, n.content, n.category, n.priority, ts, importance],
            )?;
            tx.last_insert_rowid()
        }
        NewItem::Unfinished(u) => {
            tx.execute(
                "INSERT INTO unfinished (session_id, description, context, priority, created_at, \
                 importance_score) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![session_id, u.description, u.context, u.priority, ts, importance],
            )?;
            tx.last_insert_rowid()
        }
    };

    let item_ref = ItemRef::new(item.kind(), id);
    index_fts(&tx, &item_ref)?;
    write_audit_log(&tx, "create", &item_ref, None)?;
    tx.commit()?;

    tracing::debug!(item = %item_ref, importance, "item stored");
    Ok(InsertOutcome {
        item: item_ref,
        deduplicated: false,
    })
}

/// Bump an active error with the same message. Returns its id if one matched.
fn bump_repeated_error(
    tx: &Transaction,
    message: &str,
    solution: Option<&str>,
    ts: &str,
) -> Result<Option<i64>> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM errors WHERE message = ?1 AND archived_at IS NULL \
             ORDER BY first_seen DESC LIMIT 1",
            params![message],
            |row| row.get(0),
        )
        .optional()?;

    let Some(id) = existing else {
        return Ok(None);
    };

    let solution_changed = solution.is_some();
    if solution_changed {
        unindex_fts(tx, &ItemRef::new(ItemKind::Error, id))?;
    }
    tx.execute(
        "UPDATE errors SET occurrences = occurrences + 1, last_seen = ?1, \
         solution = COALESCE(?2, solution), access_count = access_count + 1, \
         last_accessed = ?1, \
         memory_strength = CASE WHEN memory_strength IS NULL THEN NULL ELSE 1.0 END \
         WHERE id = ?3",
        params![ts, solution, id],
    )?;
    if solution_changed {
        index_fts(tx, &ItemRef::new(ItemKind::Error, id))?;
    }
    Ok(Some(id))
}

/// Create a session item, or return the existing one. Returns `true` if created.
pub fn insert_session(
    conn: &mut Connection,
    session_id: &str,
    project: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    if session_id.trim().is_empty() {
        return Err(StoreError::EmptySessionId.into());
    }
    let ts = format_timestamp(now);
    let tx = conn.transaction()?;
    let inserted = tx.execute(
        "INSERT INTO sessions (id, project, created_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(id) DO NOTHING",
        params![session_id, project, ts],
    )?;
    if inserted > 0 {
        let item = ItemRef::new(ItemKind::Session, session_id);
        index_fts(&tx, &item)?;
        write_audit_log(&tx, "session", &item, Some(&serde_json::json!({"event": "start"})))?;
    }
    tx.commit()?;
    Ok(inserted > 0)
}

/// Record a session's end time and summary, re-indexing its text.
pub fn close_session(
    conn: &mut Connection,
    session_id: &str,
    summary: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let item = ItemRef::new(ItemKind::Session, session_id);
    let tx = conn.transaction()?;
    if !row_exists(&tx, &item)? {
        return Err(StoreError::NotFound(item).into());
    }
    unindex_fts(&tx, &item)?;
    tx.execute(
        "UPDATE sessions SET ended_at = ?1, summary = COALESCE(?2, summary) WHERE id = ?3",
        params![format_timestamp(now), summary, session_id],
    )?;
    index_fts(&tx, &item)?;
    write_audit_log(&tx, "session", &item, Some(&serde_json::json!({"event": "end"})))?;
    tx.commit()?;
    Ok(())
}

/// Fetch an item by reference. Archived items are returned only when asked for.
pub fn fetch_item(conn: &Connection, item: &ItemRef, include_archived: bool) -> Result<Option<Item>> {
    let spec = item.kind.spec();
    let mut stmt = conn.prepare(&format!("SELECT * FROM {} WHERE id = ?1", spec.table))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let fields = stmt
        .query_row(params![item.sql_id()], |row| {
            let mut map = serde_json::Map::new();
            for (i, name) in names.iter().enumerate() {
                map.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            Ok(map)
        })
        .optional()?;

    let Some(fields) = fields else {
        return Ok(None);
    };

    let text = |key: &str| fields.get(key).and_then(|v| v.as_str()).map(String::from);
    let archived_at = text("archived_at");
    if archived_at.is_some() && !include_archived {
        return Ok(None);
    }

    Ok(Some(Item {
        item: item.clone(),
        title: text(spec.title_column),
        created_at: text(spec.created_column).unwrap_or_default(),
        session_id: spec.session_column.and_then(text),
        access_count: fields.get("access_count").and_then(|v| v.as_i64()).unwrap_or(0),
        last_accessed: text("last_accessed"),
        memory_strength: fields.get("memory_strength").and_then(|v| v.as_f64()),
        importance_score: fields
            .get("importance_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5),
        archived_at,
        fields,
    }))
}

/// Whether the item exists and is not archived.
pub fn is_active(conn: &Connection, item: &ItemRef) -> Result<bool> {
    let table = item.kind.spec().table;
    let active: Option<bool> = conn
        .query_row(
            &format!("SELECT archived_at IS NULL FROM {table} WHERE id = ?1"),
            params![item.sql_id()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(active.unwrap_or(false))
}

/// Soft-delete an item. Returns `false` if it was already archived.
///
/// Associations touching the item are left in place.
pub fn archive_item(conn: &Connection, item: &ItemRef, now: DateTime<Utc>) -> Result<bool> {
    if !row_exists(conn, item)? {
        return Err(StoreError::NotFound(item.clone()).into());
    }
    let table = item.kind.spec().table;
    let changed = conn.execute(
        &format!("UPDATE {table} SET archived_at = ?1 WHERE id = ?2 AND archived_at IS NULL"),
        params![format_timestamp(now), item.sql_id()],
    )?;
    if changed > 0 {
        write_audit_log(conn, "archive", item, None)?;
    }
    Ok(changed > 0)
}

fn row_exists(conn: &Connection, item: &ItemRef) -> Result<bool> {
    let table = item.kind.spec().table;
    let exists: bool = conn.query_row(
        &format!("SELECT COUNT(*) > 0 FROM {table} WHERE id = ?1"),
        params![item.sql_id()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Add the item's current text columns to its FTS5 index.
///
/// External-content tables must be given the same rowid as the base row.
pub(crate) fn index_fts(conn: &Connection, item: &ItemRef) -> Result<()> {
    let spec = item.kind.spec();
    let cols = spec.text_columns.join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {fts} (rowid, {cols}) SELECT rowid, {vals} FROM {table} WHERE id = ?1",
            fts = spec.fts_table,
            table = spec.table,
            vals = coalesced(spec.text_columns),
        ),
        params![item.sql_id()],
    )?;
    Ok(())
}

/// Remove the item's current text from its FTS5 index. Must run before the row changes.
pub(crate) fn unindex_fts(conn: &Connection, item: &ItemRef) -> Result<()> {
    let spec = item.kind.spec();
    let cols = spec.text_columns.join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {fts} ({fts}, rowid, {cols}) \
             SELECT 'delete', rowid, {vals} FROM {table} WHERE id = ?1",
            fts = spec.fts_table,
            table = spec.table,
            vals = coalesced(spec.text_columns),
        ),
        params![item.sql_id()],
    )?;
    Ok(())
}

fn coalesced(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("COALESCE({c}, '')"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Encode a file/tag list as JSON, or NULL when empty.
fn json_list(values: &[String]) -> Result<Option<String>> {
    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(values)?))
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(n) => n.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned().into(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()).into(),
    }
}

/// Write an entry to the memory_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    operation: &str,
    target: &ItemRef,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    write_audit_entry(conn, operation, &target.key(), details)
}

/// Audit entry for batch operations whose target is not a single item.
pub(crate) fn write_audit_entry(
    conn: &Connection,
    operation: &str,
    target: &str,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO memory_log (operation, target, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, target, details_json, super::now_timestamp()],
    )?;
    Ok(())
}
