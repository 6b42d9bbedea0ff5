//! Hybrid retrieval: per-kind FTS5 BM25 fused with vector similarity by
//! Reciprocal Rank Fusion.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use super::vector::{self, VectorBackend};
use crate::config::RetrievalConfig;
use crate::memory::store;
use crate::memory::types::{ItemKind, ItemRef};

/// Which retrieval leg produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Lexical,
    Vector,
    Hybrid,
}

/// A single search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub item: ItemRef,
    pub title: Option<String>,
    pub snippet: String,
    /// Negated BM25 for lexical-only search, fused RRF score otherwise.
    pub score: f64,
    pub created_at: String,
    pub importance: f64,
    pub strength: Option<f64>,
    pub source: MatchSource,
}

/// Quote each query word and OR them together, so FTS5 operators in user
/// input are treated as plain terms.
pub fn escape_fts_query(query: &str) -> String {
    query_terms(query)
        .iter()
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|word| !word.is_empty())
        .collect()
}

/// BM25 search across every kind's FTS5 index, best first.
///
/// A kind whose index is missing or fails to query is skipped.
pub fn search_bm25(
    conn: &Connection,
    query: &str,
    limit: usize,
    config: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    let escaped = escape_fts_query(query);
    if escaped.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let terms = query_terms(query);

    let mut results = Vec::new();
    for kind in ItemKind::ALL {
        match search_kind(conn, kind, &escaped, &terms, limit, config) {
            Ok(hits) => results.extend(hits),
            Err(e) => tracing::warn!(kind = %kind, error = %e, "FTS search failed for kind, skipping"),
        }
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(limit);
    Ok(results)
}

fn search_kind(
    conn: &Connection,
    kind: ItemKind,
    escaped: &str,
    terms: &[String],
    limit: usize,
    config: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    let spec = kind.spec();
    if crate::db::table_columns(conn, spec.fts_table)?.is_empty() {
        tracing::debug!(kind = %kind, "no FTS index, skipping");
        return Ok(Vec::new());
    }

    let text_columns = spec
        .text_columns
        .iter()
        .map(|c| format!("COALESCE(t.{c}, '')"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT CAST(t.id AS TEXT), -bm25({fts}), t.{title}, t.{created}, \
         t.importance_score, t.memory_strength, {text_columns} \
         FROM {fts} JOIN {table} t ON t.rowid = {fts}.rowid \
         WHERE {fts} MATCH ?1 AND t.archived_at IS NULL \
         ORDER BY bm25({fts}) LIMIT ?2",
        fts = spec.fts_table,
        table = spec.table,
        title = spec.title_column,
        created = spec.created_column,
    ))?;

    let width = spec.text_columns.len();
    let rows = stmt
        .query_map(params![escaped, limit as i64], |row| {
            let mut texts = Vec::with_capacity(width);
            for i in 0..width {
                texts.push(row.get::<_, String>(6 + i)?);
            }
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, Option<f64>>(5)?,
                texts,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(id, score, title, created_at, importance, strength, texts)| {
            let fields: Vec<&str> = texts.iter().map(String::as_str).collect();
            SearchResult {
                item: ItemRef::new(kind, id),
                title,
                snippet: extract_snippet(&fields, terms, config.snippet_chars),
                score,
                created_at,
                importance,
                strength,
                source: MatchSource::Lexical,
            }
        })
        .collect())
}

/// Pick the field containing the most query terms and cut a window of at most
/// `max_chars` characters around the first term occurrence.
pub fn extract_snippet(fields: &[&str], terms: &[String], max_chars: usize) -> String {
    let lowered_terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

    let mut best: Option<(&str, usize)> = None;
    for field in fields.iter().copied().filter(|f| !f.trim().is_empty()) {
        let haystack = field.to_lowercase();
        let hits = lowered_terms
            .iter()
            .filter(|t| haystack.contains(t.as_str()))
            .count();
        if best.map_or(true, |(_, most)| hits > most) {
            best = Some((field, hits));
        }
    }
    let Some((text, _)) = best else {
        return String::new();
    };

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    // Lowercase per char so indices line up with `chars`
    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let first_hit = lowered_terms
        .iter()
        .filter_map(|term| find_chars(&lowered, term))
        .min()
        .unwrap_or(0);

    let start = first_hit
        .saturating_sub(max_chars / 2)
        .min(chars.len() - max_chars);
    let end = start + max_chars;

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str("...");
    }
    snippet
}

fn find_chars(haystack: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle.as_slice())
}

/// Reciprocal Rank Fusion of two ranked lists: `Σ 1 / (k + rank + 1)` with
/// 0-based ranks. Best first.
pub fn rrf_fuse(lexical: &[ItemRef], vector: &[ItemRef], k: usize) -> Vec<(ItemRef, f64)> {
    let mut scores: HashMap<&ItemRef, f64> = HashMap::new();
    for list in [lexical, vector] {
        for (rank, item) in list.iter().enumerate() {
            *scores.entry(item).or_insert(0.0) += 1.0 / (k as f64 + rank as f64 + 1.0);
        }
    }

    let mut fused: Vec<(ItemRef, f64)> = scores
        .into_iter()
        .map(|(item, score)| (item.clone(), score))
        .collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    fused
}

/// Hybrid search. Without a query vector this is BM25 only.
///
/// Both legs fetch `2 × limit` candidates. Items found only by the vector leg
/// must reach `embedding_floor` similarity and still be active.
pub fn search_all(
    conn: &Connection,
    query: &str,
    limit: usize,
    query_vector: Option<&[f32]>,
    backend: VectorBackend,
    config: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    let candidates = limit * 2;
    let lexical = search_bm25(conn, query, candidates, config)?;

    let Some(query_vector) = query_vector else {
        let mut lexical = lexical;
        lexical.truncate(limit);
        return Ok(lexical);
    };

    let similar = match vector::find_similar(conn, query_vector, candidates, backend) {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "vector search failed, using BM25 only");
            let mut lexical = lexical;
            lexical.truncate(limit);
            return Ok(lexical);
        }
    };

    let lexical_refs: Vec<ItemRef> = lexical.iter().map(|r| r.item.clone()).collect();
    let vector_refs: Vec<ItemRef> = similar.iter().map(|(item, _)| item.clone()).collect();
    let similarity: HashMap<&ItemRef, f64> = similar.iter().map(|(item, s)| (item, *s)).collect();
    let mut by_item: HashMap<ItemRef, SearchResult> =
        lexical.into_iter().map(|r| (r.item.clone(), r)).collect();

    let terms = query_terms(query);
    let mut results = Vec::with_capacity(limit);
    for (item, score) in rrf_fuse(&lexical_refs, &vector_refs, config.rrf_k) {
        if results.len() >= limit {
            break;
        }
        if let Some(mut hit) = by_item.remove(&item) {
            hit.score = score;
            if similarity.contains_key(&item) {
                hit.source = MatchSource::Hybrid;
            }
            results.push(hit);
            continue;
        }

        let cosine = similarity.get(&item).copied().unwrap_or(0.0);
        if cosine < config.embedding_floor {
            continue;
        }
        if let Some(hit) = resolve_vector_hit(conn, &item, score, &terms, config)? {
            results.push(hit);
        }
    }
    Ok(results)
}

/// Look a vector-only hit up in its own table. Archived or missing rows yield `None`.
fn resolve_vector_hit(
    conn: &Connection,
    item: &ItemRef,
    score: f64,
    terms: &[String],
    config: &RetrievalConfig,
) -> Result<Option<SearchResult>> {
    let Some(found) = store::fetch_item(conn, item, false)? else {
        tracing::debug!(item = %item, "vector hit no longer active, dropping");
        return Ok(None);
    };
    let texts: Vec<&str> = item
        .kind
        .spec()
        .text_columns
        .iter()
        .filter_map(|c| found.fields.get(*c).and_then(|v| v.as_str()))
        .collect();

    Ok(Some(SearchResult {
        snippet: extract_snippet(&texts, terms, config.snippet_chars),
        item: found.item,
        title: found.title,
        score,
        created_at: found.created_at,
        importance: found.importance_score,
        strength: found.memory_strength,
        source: MatchSource::Vector,
    }))
}
