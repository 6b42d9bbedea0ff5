pub mod doctor;
pub mod maintenance;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use serde::Serialize;

use mnemos::engine::MemoryEngine;
use mnemos::memory::types::{ItemKind, ItemRef, NewItem};

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

/// Parse an item reference from separate kind and id arguments.
pub fn item_ref(kind: &str, id: &str) -> Result<ItemRef> {
    let kind: ItemKind = kind.parse().map_err(anyhow::Error::msg)?;
    Ok(ItemRef::new(kind, id))
}

/// `store <json>`: store one item and wait for its semantic pass.
pub async fn store(engine: &MemoryEngine, json: &str, session: Option<&str>) -> Result<()> {
    let item: NewItem = serde_json::from_str(json).context("invalid item JSON")?;
    let outcome = engine.store_item(item, session)?;
    if outcome.semantic_queued {
        engine.flush_background().await?;
    }
    print_json(&outcome)
}

/// `get <kind> <id>`
pub fn get(engine: &MemoryEngine, item: &ItemRef) -> Result<()> {
    match engine.get_item(item)? {
        Some(found) => print_json(&found),
        None => anyhow::bail!("item not found: {item}"),
    }
}

/// `archive <kind> <id>`
pub fn archive(engine: &MemoryEngine, item: &ItemRef) -> Result<()> {
    let archived = engine.archive_item(item)?;
    print_json(&serde_json::json!({
        "item": item,
        "archived": archived,
        "duplicates": engine.probable_duplicates(item)?,
    }))
}
