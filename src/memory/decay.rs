//! Ebbinghaus-style strength decay.
//!
//! `strength = exp(-t / half_life)` with `half_life = base · (1 + multiplier · access_count)`
//! days and `t` the days since the last access (or creation). Strength is always
//! recomputed from absolute timestamps, so a sweep can be interrupted and rerun.
//! Each call to [`run_decay`] handles a bounded number of kinds in round-robin
//! order so one large table never stalls the caller.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;

use super::store::{write_audit_entry, write_audit_log};
use super::{days_since, format_timestamp, parse_timestamp};
use crate::config::DecayConfig;
use crate::memory::types::{ItemKind, ItemRef};

/// Columns a table needs before decay touches it.
static DECAY_COLUMNS: [&str; 4] = ["memory_strength", "access_count", "last_accessed", "archived_at"];

#[derive(Debug, Serialize)]
pub struct DecayResult {
    /// Index to pass as `start_index` on the next call.
    pub next_index: usize,
    /// Kinds processed in this sweep, in order.
    pub kinds: Vec<ItemKind>,
    pub updated_by_kind: BTreeMap<String, usize>,
    /// Kinds skipped because their table lacks decay columns.
    pub skipped: Vec<ItemKind>,
}

/// Strength after `days` without access.
pub fn decay_strength(days: f64, access_count: i64, config: &DecayConfig) -> f64 {
    let half_life =
        config.base_half_life_days * (1.0 + config.access_multiplier * access_count.max(0) as f64);
    (-days.max(0.0) / half_life).exp()
}

/// Decay up to `max_tables` kinds starting at `start_index`, at the current time.
pub fn run_decay(
    conn: &mut Connection,
    config: &DecayConfig,
    max_tables: usize,
    start_index: usize,
) -> Result<DecayResult> {
    run_decay_at(conn, config, max_tables, start_index, Utc::now())
}

/// [`run_decay`] with an explicit clock.
///
/// Per-table failures are logged and skipped; only a failure to write the final
/// audit entry is returned.
pub fn run_decay_at(
    conn: &mut Connection,
    config: &DecayConfig,
    max_tables: usize,
    start_index: usize,
    now: DateTime<Utc>,
) -> Result<DecayResult> {
    let total = ItemKind::ALL.len();
    let count = max_tables.min(total);
    let start = start_index % total;

    let mut result = DecayResult {
        next_index: (start + count) % total,
        kinds: Vec::with_capacity(count),
        updated_by_kind: BTreeMap::new(),
        skipped: Vec::new(),
    };

    for offset in 0..count {
        let kind = ItemKind::ALL[(start + offset) % total];
        result.kinds.push(kind);
        match decay_kind(conn, kind, config, now) {
            Ok(Some(updated)) => {
                result.updated_by_kind.insert(kind.to_string(), updated);
            }
            Ok(None) => {
                tracing::debug!(kind = %kind, "table lacks decay columns, skipping");
                result.skipped.push(kind);
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "decay failed for table, continuing");
                result.skipped.push(kind);
            }
        }
    }

    let total_updated: usize = result.updated_by_kind.values().sum();
    if total_updated > 0 {
        write_audit_entry(
            conn,
            "decay",
            "batch",
            Some(&serde_json::json!({
                "kinds": result.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "updated": total_updated,
            })),
        )?;
    }

    Ok(result)
}

/// Decay one kind. `Ok(None)` when the table is missing required columns.
fn decay_kind(
    conn: &mut Connection,
    kind: ItemKind,
    config: &DecayConfig,
    now: DateTime<Utc>,
) -> Result<Option<usize>> {
    let spec = kind.spec();
    let columns = crate::db::table_columns(conn, spec.table)?;
    let required = DECAY_COLUMNS
        .iter()
        .chain(spec.immunity.columns())
        .chain(std::iter::once(&spec.created_column));
    for column in required {
        if !columns.contains(*column) {
            return Ok(None);
        }
    }

    let rows: Vec<(String, i64, Option<String>, String)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT CAST(id AS TEXT), access_count, last_accessed, {created} FROM {table} \
             WHERE memory_strength IS NOT NULL AND memory_strength > ?1 \
             AND archived_at IS NULL{guard}",
            created = spec.created_column,
            table = spec.table,
            guard = spec.immunity.sql_guard(),
        ))?;
        let collected = stmt
            .query_map(params![config.strength_floor], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        collected
    };

    let tx = conn.transaction()?;
    let mut updated = 0;
    {
        let mut update = tx.prepare(&format!(
            "UPDATE {} SET memory_strength = ?1 WHERE id = ?2",
            spec.table
        ))?;
        for (id, access_count, last_accessed, created) in rows {
            let reference = last_accessed
                .as_deref()
                .and_then(parse_timestamp)
                .or_else(|| parse_timestamp(&created));
            let Some(reference) = reference else {
                tracing::debug!(kind = %kind, id = %id, "no usable timestamp, skipping row");
                continue;
            };
            let strength = decay_strength(days_since(reference, now), access_count, config);
            update.execute(params![strength, ItemRef::new(kind, &id).sql_id()])?;
            updated += 1;
        }
    }
    tx.commit()?;

    Ok(Some(updated))
}

/// Record an access: strength back to 1.0, `access_count + 1`, `last_accessed = now`.
///
/// Pinned items (NULL strength) stay pinned. Returns `false` if no active row matched.
pub fn touch_memory(conn: &Connection, item: &ItemRef) -> Result<bool> {
    touch_memory_at(conn, item, Utc::now())
}

pub fn touch_memory_at(conn: &Connection, item: &ItemRef, now: DateTime<Utc>) -> Result<bool> {
    let table = item.kind.spec().table;
    let changed = conn.execute(
        &format!(
            "UPDATE {table} SET \
             memory_strength = CASE WHEN memory_strength IS NULL THEN NULL ELSE 1.0 END, \
             access_count = access_count + 1, last_accessed = ?1 \
             WHERE id = ?2 AND archived_at IS NULL"
        ),
        params![format_timestamp(now), item.sql_id()],
    )?;
    Ok(changed > 0)
}

/// Archive forgotten items of one kind: strength at or below the floor and no
/// access for `prune_after_days`. Immune and pinned items are never pruned.
pub fn prune_forgotten(
    conn: &mut Connection,
    kind: ItemKind,
    config: &DecayConfig,
    now: DateTime<Utc>,
) -> Result<usize> {
    let spec = kind.spec();
    let cutoff = format_timestamp(now - chrono::Duration::days(config.prune_after_days));
    let ids: Vec<String> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT CAST(id AS TEXT) FROM {table} \
             WHERE memory_strength IS NOT NULL AND memory_strength <= ?1 \
             AND archived_at IS NULL AND COALESCE(last_accessed, {created}) < ?2{guard}",
            table = spec.table,
            created = spec.created_column,
            guard = spec.immunity.sql_guard(),
        ))?;
        let collected = stmt
            .query_map(params![config.strength_floor, cutoff], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        collected
    };

    if ids.is_empty() {
        return Ok(0);
    }

    let ts = format_timestamp(now);
    let tx = conn.transaction()?;
    for id in &ids {
        let item = ItemRef::new(kind, id);
        tx.execute(
            &format!("UPDATE {} SET archived_at = ?1 WHERE id = ?2", spec.table),
            params![ts, item.sql_id()],
        )?;
        write_audit_log(&tx, "prune", &item, None)?;
    }
    tx.commit()?;

    tracing::info!(kind = %kind, pruned = ids.len(), "archived forgotten items");
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store;
    use crate::memory::types::{NewDecision, NewItem, NewLearning};

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn insert_decision(conn: &mut Connection, title: &str) -> ItemRef {
        store::insert_item(
            conn,
            &NewItem::Decision(NewDecision {
                title: title.into(),
                description: "desc".into(),
                ..Default::default()
            }),
            None,
            0.5,
            Utc::now(),
        )
        .unwrap()
        .item
    }

    fn insert_learning(conn: &mut Connection, core_memory: bool, auto_block: bool) -> ItemRef {
        store::insert_item(
            conn,
            &NewItem::Learning(NewLearning {
                title: "avoid X".into(),
                description: "never use X".into(),
                core_memory,
                auto_block,
                ..Default::default()
            }),
            None,
            0.5,
            Utc::now(),
        )
        .unwrap()
        .item
    }

    fn backdate(conn: &Connection, item: &ItemRef, days_ago: i64) {
        let spec = item.kind.spec();
        let old = format_timestamp(Utc::now() - chrono::Duration::days(days_ago));
        conn.execute(
            &format!("UPDATE {} SET {} = ?1 WHERE id = ?2", spec.table, spec.created_column),
            params![old, item.sql_id()],
        )
        .unwrap();
    }

    fn strength(conn: &Connection, item: &ItemRef) -> Option<f64> {
        conn.query_row(
            &format!("SELECT memory_strength FROM {} WHERE id = ?1", item.kind.spec().table),
            params![item.sql_id()],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_strength_formula() {
        let config = DecayConfig::default();
        assert_eq!(decay_strength(0.0, 0, &config), 1.0);
        assert!((decay_strength(7.0, 0, &config) - (-1.0f64).exp()).abs() < 1e-12);
        // Two accesses double the half-life
        assert!((decay_strength(14.0, 2, &config) - (-1.0f64).exp()).abs() < 1e-12);
        let ninety = decay_strength(90.0, 0, &config);
        assert!((ninety - (-90.0f64 / 7.0).exp()).abs() < 1e-15);
        assert!(ninety < 1e-5);
    }

    #[test]
    fn test_strength_strictly_decreases_with_time() {
        let config = DecayConfig::default();
        for access_count in [0, 1, 5, 50] {
            let mut previous = decay_strength(0.0, access_count, &config);
            for day in 1..120 {
                let next = decay_strength(day as f64, access_count, &config);
                assert!(next < previous, "access_count={access_count} day={day}");
                previous = next;
            }
        }
    }

    #[test]
    fn test_ninety_day_decision_is_forgotten_but_core_learning_is_not() {
        let mut conn = test_db();
        let decision = insert_decision(&mut conn, "Use X");
        let core = insert_learning(&mut conn, true, false);
        backdate(&conn, &decision, 90);
        backdate(&conn, &core, 90);

        run_decay(&mut conn, &DecayConfig::default(), 6, 0).unwrap();

        let s = strength(&conn, &decision).unwrap();
        assert!((s - (-90.0f64 / 7.0).exp()).abs() < 1e-8, "{s}");
        assert_eq!(strength(&conn, &core), Some(1.0));
    }

    #[test]
    fn test_auto_block_learning_is_immune() {
        let mut conn = test_db();
        let blocked = insert_learning(&mut conn, false, true);
        let plain = insert_learning(&mut conn, false, false);
        backdate(&conn, &blocked, 30);
        backdate(&conn, &plain, 30);

        run_decay(&mut conn, &DecayConfig::default(), 6, 0).unwrap();

        assert_eq!(strength(&conn, &blocked), Some(1.0));
        assert!(strength(&conn, &plain).unwrap() < 0.1);
    }

    #[test]
    fn test_touch_resets_strength() {
        let mut conn = test_db();
        let item = insert_decision(&mut conn, "touched");
        backdate(&conn, &item, 20);
        run_decay(&mut conn, &DecayConfig::default(), 6, 0).unwrap();
        assert!(strength(&conn, &item).unwrap() < 0.1);

        assert!(touch_memory(&conn, &item).unwrap());
        assert_eq!(strength(&conn, &item), Some(1.0));
        let (count, last): (i64, Option<String>) = conn
            .query_row(
                "SELECT access_count, last_accessed FROM decisions WHERE id = ?1",
                params![item.sql_id()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!(last.is_some());

        // Decay right after a touch leaves it at (almost exactly) full strength
        run_decay(&mut conn, &DecayConfig::default(), 6, 0).unwrap();
        assert!(strength(&conn, &item).unwrap() > 0.999);
    }

    #[test]
    fn test_pinned_and_archived_untouched() {
        let mut conn = test_db();
        let pinned = insert_decision(&mut conn, "pinned");
        let archived = insert_decision(&mut conn, "archived");
        conn.execute(
            "UPDATE decisions SET memory_strength = NULL WHERE id = ?1",
            params![pinned.sql_id()],
        )
        .unwrap();
        store::archive_item(&conn, &archived, Utc::now()).unwrap();
        backdate(&conn, &pinned, 60);
        backdate(&conn, &archived, 60);

        run_decay(&mut conn, &DecayConfig::default(), 6, 0).unwrap();

        assert_eq!(strength(&conn, &pinned), None);
        assert_eq!(strength(&conn, &archived), Some(1.0));
        // Touch keeps a pinned item pinned
        touch_memory(&conn, &pinned).unwrap();
        assert_eq!(strength(&conn, &pinned), None);
    }

    #[test]
    fn test_dead_items_are_skipped() {
        let mut conn = test_db();
        let item = insert_decision(&mut conn, "dead");
        conn.execute(
            "UPDATE decisions SET memory_strength = 0.005 WHERE id = ?1",
            params![item.sql_id()],
        )
        .unwrap();

        let result = run_decay(&mut conn, &DecayConfig::default(), 1, 0).unwrap();
        assert_eq!(result.updated_by_kind["decision"], 0);
        assert_eq!(strength(&conn, &item), Some(0.005));
    }

    #[test]
    fn test_round_robin_indices() {
        let mut conn = test_db();
        let config = DecayConfig::default();

        let first = run_decay(&mut conn, &config, 2, 0).unwrap();
        assert_eq!(first.kinds, vec![ItemKind::Decision, ItemKind::Error]);
        assert_eq!(first.next_index, 2);

        let wrap = run_decay(&mut conn, &config, 4, 4).unwrap();
        assert_eq!(
            wrap.kinds,
            vec![ItemKind::Unfinished, ItemKind::Session, ItemKind::Decision, ItemKind::Error]
        );
        assert_eq!(wrap.next_index, 2);

        let capped = run_decay(&mut conn, &config, 100, 9).unwrap();
        assert_eq!(capped.kinds.len(), ItemKind::ALL.len());
        assert_eq!(capped.next_index, 3);

        let none = run_decay(&mut conn, &config, 0, 1).unwrap();
        assert!(none.kinds.is_empty());
        assert_eq!(none.next_index, 1);
    }

    #[test]
    fn test_missing_columns_skipped_silently() {
        db::load_sqlite_vec();
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE decisions (id INTEGER PRIMARY KEY, title TEXT, created_at TEXT);",
        )
        .unwrap();
        // Tables for the other kinds do not exist at all
        conn.execute_batch(
            "CREATE TABLE memory_log (id INTEGER PRIMARY KEY AUTOINCREMENT, operation TEXT, \
             target TEXT, details TEXT, created_at TEXT);",
        )
        .unwrap();

        let result = run_decay(&mut conn, &DecayConfig::default(), 6, 0).unwrap();
        assert_eq!(result.skipped.len(), 6);
        assert!(result.updated_by_kind.is_empty());
    }

    #[test]
    fn test_prune_archives_forgotten_but_not_immune() {
        let mut conn = test_db();
        let config = DecayConfig::default();
        let decision = insert_decision(&mut conn, "forgotten");
        let core = insert_learning(&mut conn, true, false);
        backdate(&conn, &decision, 90);
        backdate(&conn, &core, 90);
        for item in [&decision, &core] {
            conn.execute(
                &format!(
                    "UPDATE {} SET memory_strength = 0.001 WHERE id = ?1",
                    item.kind.spec().table
                ),
                params![item.sql_id()],
            )
            .unwrap();
        }

        assert_eq!(prune_forgotten(&mut conn, ItemKind::Decision, &config, Utc::now()).unwrap(), 1);
        assert_eq!(prune_forgotten(&mut conn, ItemKind::Learning, &config, Utc::now()).unwrap(), 0);
        assert!(!store::is_active(&conn, &decision).unwrap());
        assert!(store::is_active(&conn, &core).unwrap());
    }
}
