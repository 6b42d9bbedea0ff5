use anyhow::Result;

use mnemos::engine::MemoryEngine;

use super::print_json;

/// `stats`: store counts plus background queue counters.
pub fn stats(engine: &MemoryEngine) -> Result<()> {
    let response = engine.stats()?;
    print_json(&serde_json::json!({
        "store": response,
        "vector_backend": engine.vector_backend(),
        "background": engine.background_stats(),
    }))
}
