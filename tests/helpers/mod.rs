#![allow(dead_code)]

use anyhow::Result;
use mnemos::config::MnemosConfig;
use mnemos::db;
use mnemos::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use mnemos::engine::MemoryEngine;
use rusqlite::Connection;
use std::sync::Arc;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Engine over an in-memory database, optionally with an embedder.
pub fn test_engine(embedder: Option<Arc<dyn EmbeddingProvider>>) -> MemoryEngine {
    MemoryEngine::with_connection(test_db(), embedder, MnemosConfig::default())
}

/// Generate a deterministic 384-dim embedding with a spike at position `seed`.
/// Distinct seeds give orthogonal vectors.
pub fn test_embedding(seed: u16) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed as usize % EMBEDDING_DIM] = 1.0;
    v
}

/// Unit vector at exactly `cosine` similarity to `test_embedding(seed)`.
pub fn embedding_at(seed: u16, cosine: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed as usize % EMBEDDING_DIM] = cosine;
    v[(seed as usize + 1) % EMBEDDING_DIM] = (1.0 - cosine * cosine).sqrt();
    v
}

/// Embeds text by keyword: the first rule whose keyword occurs in the text wins,
/// anything else gets a spike on the last dimension.
pub struct StubEmbedder {
    rules: Vec<(&'static str, Vec<f32>)>,
}

impl StubEmbedder {
    pub fn new(rules: Vec<(&'static str, Vec<f32>)>) -> Arc<dyn EmbeddingProvider> {
        Arc::new(Self { rules })
    }
}

impl EmbeddingProvider for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(self
            .rules
            .iter()
            .find(|(keyword, _)| text.contains(keyword))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| test_embedding(EMBEDDING_DIM as u16 - 1)))
    }
}

/// Set an item's creation time `days` days in the past.
pub fn backdate(conn: &Connection, table: &str, created_column: &str, id: i64, days: i64) {
    let old = mnemos::memory::format_timestamp(chrono::Utc::now() - chrono::Duration::days(days));
    conn.execute(
        &format!("UPDATE {table} SET {created_column} = ?1 WHERE id = ?2"),
        rusqlite::params![old, id],
    )
    .unwrap();
}
