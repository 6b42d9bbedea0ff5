//! The memory engine: one shared connection plus the scorer, embedder and
//! background queue, exposing the operations the CLI (or any host) calls.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::background::{BackgroundQueue, QueueStats};
use crate::config::MnemosConfig;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::memory::activation::{self, ActivatedItem};
use crate::memory::associations;
use crate::memory::decay::{self, DecayResult};
use crate::memory::importance::{ImportanceInput, ImportanceScorer};
use crate::memory::search::{self, SearchResult};
use crate::memory::stats::{self, StatsResponse};
use crate::memory::store;
use crate::memory::types::{Item, ItemKind, ItemRef, NewItem};
use crate::memory::vector::{self, DuplicatePair, VectorBackend};

/// Result of [`MemoryEngine::store_item`].
#[derive(Debug, Serialize)]
pub struct StoreOutcome {
    #[serde(flatten)]
    pub item: ItemRef,
    pub deduplicated: bool,
    pub importance: f64,
    /// Heuristic edges created synchronously.
    pub associations: usize,
    /// Whether a semantic pass was handed to the background queue. `false` with an
    /// embedder configured means it already ran inline.
    pub semantic_queued: bool,
}

/// What to spread activation from.
#[derive(Debug, Clone)]
pub enum RelatedTarget {
    Files(Vec<String>),
    Seeds(Vec<ItemRef>),
}

/// Result of [`MemoryEngine::run_maintenance`].
#[derive(Debug, Serialize)]
pub struct MaintenanceReport {
    pub next_index: usize,
    pub decay: DecayResult,
    pub pruned: BTreeMap<String, usize>,
    /// Active items that had no embedding and were embedded this run.
    pub embedded: usize,
}

/// Result of a session boundary.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    /// `false` when starting a session that already existed.
    pub created: bool,
    pub refreshed: BTreeMap<String, usize>,
}

pub struct MemoryEngine {
    db: Arc<Mutex<Connection>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: Arc<MnemosConfig>,
    scorer: Arc<ImportanceScorer>,
    background: BackgroundQueue,
    backend: VectorBackend,
    db_path: Option<PathBuf>,
}

impl MemoryEngine {
    /// Open the configured database and embedding provider.
    pub fn open(config: MnemosConfig) -> Result<Self> {
        let path = config.resolved_db_path();
        let conn = db::open_database(&path)?;
        let embedder = embedding::create_provider(&config.embedding)?;
        let mut engine = Self::with_connection(conn, embedder, config);
        engine.db_path = Some(path);
        Ok(engine)
    }

    /// Build an engine around an already-initialized connection.
    pub fn with_connection(
        conn: Connection,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: MnemosConfig,
    ) -> Self {
        let backend = VectorBackend::detect(&conn);
        tracing::info!(
            backend = ?backend,
            embeddings = embedder.is_some(),
            "memory engine ready"
        );
        Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
            scorer: Arc::new(ImportanceScorer::new(config.importance.clone())),
            background: BackgroundQueue::new(config.background.max_concurrency),
            config: Arc::new(config),
            backend,
            db_path: None,
        }
    }

    pub fn config(&self) -> &MnemosConfig {
        &self.config
    }

    pub fn vector_backend(&self) -> VectorBackend {
        self.backend
    }

    /// Validate, score and insert an item, then link it.
    ///
    /// Heuristic associations are created before returning; the semantic pass
    /// runs in the background when an embedder is configured.
    pub fn store_item(&self, item: NewItem, session_id: Option<&str>) -> Result<StoreOutcome> {
        store::validate(&item)?;
        let now = Utc::now();
        let mut conn = lock(&self.db)?;

        let importance = self.scorer.compute_importance(
            &conn,
            &ImportanceInput {
                access_count: 0,
                last_accessed: None,
                created_at: now,
                impact: item.impact(),
                kind: item.kind(),
                session_id,
            },
            now,
        )?;
        let inserted = store::insert_item(&mut conn, &item, session_id, importance, now)?;
        if inserted.deduplicated {
            tracing::info!(item = %inserted.item, "repeated error bumped");
            return Ok(StoreOutcome {
                item: inserted.item,
                deduplicated: true,
                importance,
                associations: 0,
                semantic_queued: false,
            });
        }

        let associations = associations::auto_create_associations(
            &mut conn,
            &inserted.item,
            session_id,
            item.files(),
            &self.config.association,
            now,
        )
        .unwrap_or_else(|e| {
            tracing::warn!(item = %inserted.item, error = %e, "heuristic associations failed");
            0
        });
        drop(conn);

        let semantic_queued = self.enqueue_semantic_pass(&inserted.item, item.embedding_text());
        tracing::info!(
            item = %inserted.item,
            importance,
            associations,
            semantic_queued,
            "item stored"
        );

        Ok(StoreOutcome {
            item: inserted.item,
            deduplicated: false,
            importance,
            associations,
            semantic_queued,
        })
    }

    fn enqueue_semantic_pass(&self, item: &ItemRef, text: String) -> bool {
        let Some(embedder) = self.embedder.clone() else {
            return false;
        };
        let db = Arc::clone(&self.db);
        let config = Arc::clone(&self.config);
        let backend = self.backend;
        let item = item.clone();

        self.background.submit("semantic-pass", move || {
            semantic_pass(&db, embedder.as_ref(), &config, backend, &item, &text)
        })
    }

    /// Embed and link active items that have no embedding yet, up to `limit` per kind.
    ///
    /// Covers passes that failed or were cut short. Returns the number embedded;
    /// a failing item is logged and skipped.
    pub fn embed_missing(&self, limit: usize) -> Result<usize> {
        let Some(embedder) = self.embedder.as_deref() else {
            return Ok(0);
        };
        let mut embedded = 0;
        for kind in ItemKind::ALL.into_iter().filter(|k| *k != ItemKind::Session) {
            let missing = {
                let conn = lock(&self.db)?;
                vector::items_missing_embeddings(&conn, kind, limit)?
            };
            for (item, text) in missing {
                match semantic_pass(&self.db, embedder, &self.config, self.backend, &item, &text) {
                    Ok(()) => embedded += 1,
                    Err(e) => tracing::warn!(item = %item, error = %e, "embedding backfill failed"),
                }
            }
        }
        if embedded > 0 {
            tracing::info!(embedded, "embedded items missing a vector");
        }
        Ok(embedded)
    }

    /// Fetch an active item and record the access.
    pub fn get_item(&self, item: &ItemRef) -> Result<Option<Item>> {
        let conn = lock(&self.db)?;
        if store::fetch_item(&conn, item, false)?.is_none() {
            return Ok(None);
        }
        decay::touch_memory(&conn, item)?;
        store::fetch_item(&conn, item, false)
    }

    /// Hybrid search when `use_vector` and an embedder are available, BM25 otherwise.
    /// Every returned item is touched.
    pub fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        use_vector: bool,
    ) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.config.retrieval.default_limit);
        let query_vector = match (&self.embedder, use_vector) {
            (Some(embedder), true) => match embedding::embed_checked(embedder.as_ref(), query) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, using BM25 only");
                    None
                }
            },
            _ => None,
        };

        let conn = lock(&self.db)?;
        let results = search::search_all(
            &conn,
            query,
            limit,
            query_vector.as_deref(),
            self.backend,
            &self.config.retrieval,
        )?;
        for result in &results {
            if let Err(e) = decay::touch_memory(&conn, &result.item) {
                tracing::warn!(item = %result.item, error = %e, "failed to touch search hit");
            }
        }
        tracing::debug!(query, hits = results.len(), "search done");
        Ok(results)
    }

    /// Items associated with files or seed items, by spreading activation.
    ///
    /// Activation flows through archived items but they are not returned.
    pub fn related_to(&self, target: RelatedTarget) -> Result<Vec<ActivatedItem>> {
        let conn = lock(&self.db)?;
        let spread = match &target {
            RelatedTarget::Files(files) => {
                activation::activate_for_files(&conn, files, &self.config.activation)?
            }
            RelatedTarget::Seeds(seeds) => {
                activation::spreading_activation(&*conn, seeds, &self.config.activation)?
            }
        };

        if let Err(e) = associations::mark_activated(&conn, &spread.edges, Utc::now()) {
            tracing::warn!(error = %e, "failed to record edge activation");
        }

        let mut items = Vec::with_capacity(spread.items.len());
        for activated in spread.items {
            if store::is_active(&conn, &activated.item)? {
                items.push(activated);
            }
        }
        Ok(items)
    }

    /// One decay sweep continuing from the persisted cursor, archival pruning of
    /// the kinds just decayed, then an embedding backfill when an embedder is set.
    pub fn run_maintenance(&self, max_tables: Option<usize>) -> Result<MaintenanceReport> {
        let max_tables = max_tables.unwrap_or(self.config.decay.tables_per_run);
        let now = Utc::now();
        let mut conn = lock(&self.db)?;

        let cursor = db::migrations::get_meta(&conn, "decay_cursor")?
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let result = decay::run_decay_at(&mut conn, &self.config.decay, max_tables, cursor, now)?;

        let mut pruned = BTreeMap::new();
        for kind in result.kinds.iter().filter(|k| !result.skipped.contains(*k)) {
            match decay::prune_forgotten(&mut conn, *kind, &self.config.decay, now) {
                Ok(n) => {
                    pruned.insert(kind.to_string(), n);
                }
                Err(e) => tracing::warn!(kind = %kind, error = %e, "pruning failed"),
            }
        }

        db::migrations::set_meta(&conn, "decay_cursor", &result.next_index.to_string())?;
        drop(conn);

        let embedded = self
            .embed_missing(self.config.background.backfill_batch)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "embedding backfill failed");
                0
            });
        tracing::info!(
            next_index = result.next_index,
            updated = result.updated_by_kind.values().sum::<usize>(),
            pruned = pruned.values().sum::<usize>(),
            embedded,
            "maintenance run complete"
        );

        Ok(MaintenanceReport {
            next_index: result.next_index,
            decay: result,
            pruned,
            embedded,
        })
    }

    /// Record a session start, reset cached surprise and refresh importance.
    pub fn start_session(&self, session_id: &str, project: Option<&str>) -> Result<SessionReport> {
        let now = Utc::now();
        let mut conn = lock(&self.db)?;
        let created = store::insert_session(&mut conn, session_id, project, now)?;
        let refreshed = self.refresh_all(&mut conn, session_id);
        tracing::info!(session = session_id, created, "session started");
        Ok(SessionReport {
            session_id: session_id.to_string(),
            created,
            refreshed,
        })
    }

    /// Close a session, reset cached surprise and refresh importance.
    pub fn end_session(&self, session_id: &str, summary: Option<&str>) -> Result<SessionReport> {
        let now = Utc::now();
        let mut conn = lock(&self.db)?;
        store::close_session(&mut conn, session_id, summary, now)?;
        let refreshed = self.refresh_all(&mut conn, session_id);
        tracing::info!(session = session_id, "session ended");
        Ok(SessionReport {
            session_id: session_id.to_string(),
            created: false,
            refreshed,
        })
    }

    /// Best effort: a kind that fails to refresh is logged and left out of the map.
    fn refresh_all(&self, conn: &mut Connection, session_id: &str) -> BTreeMap<String, usize> {
        // Sessionless callers share the `None` entry; a boundary resets it too.
        self.scorer.invalidate(Some(session_id));
        self.scorer.invalidate(None);
        let now = Utc::now();
        let mut refreshed = BTreeMap::new();
        for kind in ItemKind::ALL {
            match self
                .scorer
                .refresh_importance_scores(conn, kind, Some(session_id), now)
            {
                Ok(n) => {
                    refreshed.insert(kind.to_string(), n);
                }
                Err(e) => tracing::warn!(kind = %kind, error = %e, "importance refresh failed"),
            }
        }
        refreshed
    }

    pub fn archive_item(&self, item: &ItemRef) -> Result<bool> {
        let conn = lock(&self.db)?;
        store::archive_item(&conn, item, Utc::now())
    }

    pub fn stats(&self) -> Result<StatsResponse> {
        let conn = lock(&self.db)?;
        stats::memory_stats(&conn, self.db_path.as_deref())
    }

    pub fn probable_duplicates(&self, item: &ItemRef) -> Result<Vec<DuplicatePair>> {
        let conn = lock(&self.db)?;
        vector::probable_duplicates(&conn, item)
    }

    pub fn background_stats(&self) -> QueueStats {
        self.background.stats()
    }

    /// Wait for queued semantic passes to finish.
    pub async fn flush_background(&self) -> Result<()> {
        self.background.flush().await
    }
}

/// Embed `text`, then store the vector and create semantic links for `item`.
fn semantic_pass(
    db: &Mutex<Connection>,
    embedder: &dyn EmbeddingProvider,
    config: &MnemosConfig,
    backend: VectorBackend,
    item: &ItemRef,
    text: &str,
) -> Result<()> {
    let vector = embedding::embed_checked(embedder, text)?;
    let mut conn = lock(db)?;
    associations::run_semantic_pass(
        &mut conn,
        item,
        &vector,
        &config.embedding.model,
        &config.association,
        config.retrieval.dedup_threshold,
        backend,
    )?;
    Ok(())
}

fn lock(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))
}
