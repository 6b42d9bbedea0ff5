//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use mnemos::config::MnemosConfig;
use mnemos::db;

use super::print_json;

/// Open the configured database directly and report its health.
pub fn doctor(config: &MnemosConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    if !db_path.exists() {
        anyhow::bail!("no database at {}", db_path.display());
    }

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;
    let embedding_model = db::migrations::get_embedding_model(&conn)?;
    let integrity_ok = report.integrity_ok;

    print_json(&serde_json::json!({
        "database": db_path.display().to_string(),
        "report": report,
        "embedding_model": embedding_model,
    }))?;

    if !integrity_ok {
        anyhow::bail!("integrity check failed");
    }
    Ok(())
}
