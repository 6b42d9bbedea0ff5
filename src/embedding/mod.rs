//! Text-to-vector embedding seam.
//!
//! Embedding generation lives outside this crate. Hosts implement
//! [`EmbeddingProvider`] and hand it to the engine; without one, search runs
//! lexical-only and no semantic associations are created.

use anyhow::Result;
use std::sync::Arc;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce vectors of exactly [`EMBEDDING_DIM`] dimensions. Vectors
/// are L2-normalized again before storage, so providers need not normalize.
/// All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Embed `text` and reject vectors the store cannot index.
pub fn embed_checked(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let expected = provider.dimensions();
    anyhow::ensure!(
        expected == EMBEDDING_DIM,
        "embedding provider declares {expected} dimensions, store expects {EMBEDDING_DIM}"
    );
    let vector = provider.embed(text)?;
    anyhow::ensure!(
        vector.len() == expected,
        "embedding has {} dimensions, expected {expected}",
        vector.len()
    );
    Ok(vector)
}

/// Create an embedding provider from config.
///
/// Only `"none"` is built in; any other name is an error so a typo does not
/// silently disable semantic search.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "none" | "" => Ok(None),
        other => anyhow::bail!(
            "unknown embedding provider: {other}. Built in: none (register a provider through MemoryEngine::with_connection)"
        ),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Cosine similarity of two vectors; 0.0 when either is zero or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
