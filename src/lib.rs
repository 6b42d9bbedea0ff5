//! Persistent, cross-session memory for AI coding assistants.
//!
//! Mnemos stores decisions, errors, learnings, notes, open tasks and sessions in
//! an embedded SQLite database and models them as human memory does: items fade
//! unless used, carry an importance score, link to each other, and are recalled
//! by hybrid lexical and semantic search.
//!
//! # Architecture
//!
//! - **Decay**: Ebbinghaus forgetting curve, strength `exp(-t / half_life)` with a
//!   half-life that grows with each access; refreshed only by access
//! - **Importance**: weighted frequency, recency, impact, surprise and sentiment
//! - **Associations**: same-session, temporal, same-file and semantic edges, queried
//!   by spreading activation
//! - **Search**: FTS5 BM25 per kind fused with vector similarity by Reciprocal Rank
//!   Fusion; [sqlite-vec](https://github.com/asg017/sqlite-vec) answers KNN when loaded
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`embedding`]: the embedding provider seam
//! - [`memory`]: storage, decay, importance, associations, activation and search
//! - [`background`]: bounded background work queue
//! - [`engine`]: [`engine::MemoryEngine`], the entry point for hosts

pub mod background;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod memory;
