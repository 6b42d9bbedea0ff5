use anyhow::Result;

use mnemos::engine::{MemoryEngine, RelatedTarget};
use mnemos::memory::types::ItemRef;

use super::print_json;

/// `search <query>`: hybrid search, or lexical only with `--lexical`.
pub fn search(engine: &MemoryEngine, query: &str, limit: Option<usize>, lexical: bool) -> Result<()> {
    let results = engine.search(query, limit, !lexical)?;
    tracing::info!(query, hits = results.len(), "search complete");
    print_json(&results)
}

/// `related --file <path>... --seed <kind:id>...`
pub fn related(engine: &MemoryEngine, files: Vec<String>, seeds: Vec<ItemRef>) -> Result<()> {
    let target = match (files.is_empty(), seeds.is_empty()) {
        (false, true) => RelatedTarget::Files(files),
        (true, false) => RelatedTarget::Seeds(seeds),
        (true, true) => anyhow::bail!("give at least one --file or --seed"),
        (false, false) => anyhow::bail!("--file and --seed cannot be combined"),
    };
    print_json(&engine.related_to(target)?)
}
