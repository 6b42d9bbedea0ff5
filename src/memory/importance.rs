//! Five-dimension importance scoring.
//!
//! `importance = 0.15·frequency + 0.25·recency + 0.30·impact + 0.15·surprise + 0.15·sentiment`,
//! each dimension in `[0, 1]`, rounded to three decimals. Surprise needs a count of
//! every active item, so [`ImportanceScorer`] caches it per logical session in a
//! [`SurpriseCache`] until [`ImportanceScorer::invalidate`] is called.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{days_since, format_timestamp, parse_timestamp};
use crate::config::ImportanceConfig;
use crate::memory::types::ItemKind;

pub const FREQUENCY_WEIGHT: f64 = 0.15;
pub const RECENCY_WEIGHT: f64 = 0.25;
pub const IMPACT_WEIGHT: f64 = 0.30;
pub const SURPRISE_WEIGHT: f64 = 0.15;
pub const SENTIMENT_WEIGHT: f64 = 0.15;

/// Inputs for one importance computation.
#[derive(Debug, Clone)]
pub struct ImportanceInput<'a> {
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Priority or severity label, e.g. `"high"`.
    pub impact: Option<&'a str>,
    pub kind: ItemKind,
    pub session_id: Option<&'a str>,
}

/// Per-dimension values before weighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub frequency: f64,
    pub recency: f64,
    pub impact: f64,
    pub surprise: f64,
    pub sentiment: f64,
}

impl Dimensions {
    /// Weighted sum, clamped to `[0, 1]` and rounded to three decimals.
    pub fn score(&self) -> f64 {
        let raw = FREQUENCY_WEIGHT * self.frequency
            + RECENCY_WEIGHT * self.recency
            + IMPACT_WEIGHT * self.impact
            + SURPRISE_WEIGHT * self.surprise
            + SENTIMENT_WEIGHT * self.sentiment;
        round3(raw.clamp(0.0, 1.0))
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Map a manual priority/severity label onto the impact dimension.
pub fn impact_score(label: Option<&str>) -> f64 {
    match label.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("high" | "critical") => 1.0,
        Some("medium") => 0.6,
        Some("low") => 0.3,
        _ => 0.5,
    }
}

/// Per-session cache of the surprise dimension for each kind.
#[derive(Debug, Default)]
pub struct SurpriseCache {
    entries: HashMap<Option<String>, HashMap<ItemKind, f64>>,
}

impl SurpriseCache {
    pub fn get(&self, session_id: Option<&str>, kind: ItemKind) -> Option<f64> {
        self.entries
            .get(&session_id.map(String::from))
            .and_then(|per_kind| per_kind.get(&kind).copied())
    }

    pub fn insert(&mut self, session_id: Option<&str>, values: HashMap<ItemKind, f64>) {
        self.entries.insert(session_id.map(String::from), values);
    }

    /// Drop the cached values for one session.
    pub fn invalidate(&mut self, session_id: Option<&str>) {
        self.entries.remove(&session_id.map(String::from));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Computes importance scores, owning the surprise cache.
#[derive(Debug)]
pub struct ImportanceScorer {
    config: ImportanceConfig,
    cache: Mutex<SurpriseCache>,
}

impl ImportanceScorer {
    pub fn new(config: ImportanceConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(SurpriseCache::default()),
        }
    }

    /// Score one item.
    pub fn compute_importance(
        &self,
        conn: &Connection,
        input: &ImportanceInput<'_>,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let surprise = self.surprise(conn, input.kind, input.session_id)?;
        Ok(self.dimensions(input, surprise, now).score())
    }

    /// The five dimensions for `input` given a surprise value.
    pub fn dimensions(
        &self,
        input: &ImportanceInput<'_>,
        surprise: f64,
        now: DateTime<Utc>,
    ) -> Dimensions {
        let frequency = (input.access_count.max(0) as f64 / self.config.frequency_cap).min(1.0);
        let touched = input.last_accessed.unwrap_or(input.created_at);
        let recency = (-days_since(touched, now) / self.config.recency_days).exp();

        Dimensions {
            frequency,
            recency,
            impact: impact_score(input.impact),
            surprise: surprise.clamp(0.0, 1.0),
            sentiment: input.kind.spec().sentiment,
        }
    }

    /// `1 - active_of_kind / total_active`, cached per session.
    pub fn surprise(&self, conn: &Connection, kind: ItemKind, session_id: Option<&str>) -> Result<f64> {
        {
            let cache = self.lock_cache()?;
            if let Some(value) = cache.get(session_id, kind) {
                return Ok(value);
            }
        }

        let values = compute_surprise(conn)?;
        let value = values.get(&kind).copied().unwrap_or(0.5);
        self.lock_cache()?.insert(session_id, values);
        tracing::debug!(session = ?session_id, "surprise cache refreshed");
        Ok(value)
    }

    /// Forget cached surprise values for a session boundary.
    pub fn invalidate(&self, session_id: Option<&str>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.invalidate(session_id);
        }
    }

    pub fn cached_sessions(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, SurpriseCache>> {
        self.cache
            .lock()
            .map_err(|e| anyhow!("surprise cache lock poisoned: {e}"))
    }

    /// Recompute scores for up to `refresh_batch` active rows of one kind, newest first.
    ///
    /// Returns the number of rows updated. Idempotent: every score is derived from
    /// absolute timestamps.
    pub fn refresh_importance_scores(
        &self,
        conn: &mut Connection,
        kind: ItemKind,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let spec = kind.spec();
        let impact = spec.impact_column.unwrap_or("NULL");
        let rows: Vec<(String, i64, Option<String>, String, Option<String>)> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT CAST(id AS TEXT), access_count, last_accessed, {created}, {impact} \
                 FROM {table} WHERE archived_at IS NULL \
                 ORDER BY {created} DESC LIMIT ?1",
                created = spec.created_column,
                table = spec.table,
            ))?;
            let collected = stmt
                .query_map(params![self.config.refresh_batch as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            collected
        };

        let surprise = self.surprise(conn, kind, session_id)?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut update = tx.prepare(&format!(
                "UPDATE {} SET importance_score = ?1 WHERE id = ?2",
                spec.table
            ))?;
            for (id, access_count, last_accessed, created, impact) in rows {
                let Some(created_at) = parse_timestamp(&created) else {
                    tracing::debug!(kind = %kind, id = %id, created = %created, "unparsable timestamp, skipping");
                    continue;
                };
                let input = ImportanceInput {
                    access_count,
                    last_accessed: last_accessed.as_deref().and_then(parse_timestamp),
                    created_at,
                    impact: impact.as_deref(),
                    kind,
                    session_id,
                };
                let score = self.dimensions(&input, surprise, now).score();
                update.execute(params![score, crate::memory::types::ItemRef::new(kind, &id).sql_id()])?;
                updated += 1;
            }
        }
        tx.commit()?;

        tracing::debug!(kind = %kind, updated, at = %format_timestamp(now), "importance refreshed");
        Ok(updated)
    }
}

/// Surprise for every kind from one scan of active counts.
fn compute_surprise(conn: &Connection) -> Result<HashMap<ItemKind, f64>> {
    let mut counts = HashMap::new();
    let mut total = 0i64;
    for kind in ItemKind::ALL {
        let n: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE archived_at IS NULL",
                kind.spec().table
            ),
            [],
            |row| row.get(0),
        )?;
        counts.insert(kind, n);
        total += n;
    }

    Ok(counts
        .into_iter()
        .map(|(kind, n)| {
            let surprise = if total == 0 {
                0.5
            } else {
                1.0 - n as f64 / total as f64
            };
            (kind, surprise)
        })
        .collect())
}
