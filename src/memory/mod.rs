pub mod activation;
pub mod associations;
pub mod decay;
pub mod importance;
pub mod search;
pub mod stats;
pub mod store;
pub mod types;
pub mod vector;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert raw bytes back to an f32 embedding. Trailing partial chunks are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Canonical timestamp text: RFC 3339, UTC, millisecond precision.
///
/// Fixed width, so timestamps compare correctly as strings inside SQL.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a stored timestamp. Accepts RFC 3339 and SQLite's `YYYY-MM-DD HH:MM:SS`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Fractional days from `since` to `now`, never negative.
pub fn days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - since).num_milliseconds() as f64 / 1000.0;
    (secs / 86_400.0).max(0.0)
}
