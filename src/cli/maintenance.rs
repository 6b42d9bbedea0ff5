//! CLI lifecycle commands: decay sweeps and session boundaries.

use anyhow::Result;

use mnemos::engine::MemoryEngine;

use super::print_json;

/// `maintain [--tables N]`: one decay sweep plus archival pruning.
pub fn maintain(engine: &MemoryEngine, tables: Option<usize>) -> Result<()> {
    let report = engine.run_maintenance(tables)?;
    print_json(&report)
}

/// `session start [id] [--project P]`
pub fn session_start(engine: &MemoryEngine, id: &str, project: Option<&str>) -> Result<()> {
    print_json(&engine.start_session(id, project)?)
}

/// `session end <id> [--summary S]`
pub fn session_end(engine: &MemoryEngine, id: &str, summary: Option<&str>) -> Result<()> {
    print_json(&engine.end_session(id, summary)?)
}
