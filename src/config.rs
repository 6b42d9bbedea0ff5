use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MnemosConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub decay: DecayConfig,
    pub importance: ImportanceConfig,
    pub association: AssociationConfig,
    pub activation: ActivationConfig,
    pub background: BackgroundConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"none"` disables embeddings; hosts wire their own provider through the library API.
    pub provider: String,
    /// Identifier recorded next to every stored vector.
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub rrf_k: usize,
    /// Minimum cosine similarity for a vector-only hit to survive fusion.
    pub embedding_floor: f64,
    pub snippet_chars: usize,
    pub dedup_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    pub base_half_life_days: f64,
    pub access_multiplier: f64,
    /// Items at or below this strength are considered forgotten and skipped.
    pub strength_floor: f64,
    pub tables_per_run: usize,
    pub prune_after_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImportanceConfig {
    pub frequency_cap: f64,
    pub recency_days: f64,
    pub refresh_batch: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssociationConfig {
    pub cross_type_limit: usize,
    pub cross_type_strength: f64,
    pub same_type_limit: usize,
    pub same_type_strength: f64,
    pub temporal_window_secs: i64,
    pub temporal_limit: usize,
    pub temporal_strength: f64,
    pub same_file_limit: usize,
    pub same_file_strength: f64,
    pub semantic_threshold: f64,
    pub semantic_candidates: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActivationConfig {
    pub max_hops: usize,
    pub hop_decay: f64,
    pub min_activation: f64,
    pub max_files: usize,
    pub seeds_per_file: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackgroundConfig {
    pub max_concurrency: usize,
    /// Items per kind embedded by a maintenance run's backfill.
    pub backfill_batch: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnemos_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            model: "all-MiniLM-L6-v2".into(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            rrf_k: 60,
            embedding_floor: 0.28,
            snippet_chars: 150,
            dedup_threshold: 0.92,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_half_life_days: 7.0,
            access_multiplier: 0.5,
            strength_floor: 0.01,
            tables_per_run: 2,
            prune_after_days: 30,
        }
    }
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            frequency_cap: 10.0,
            recency_days: 14.0,
            refresh_batch: 500,
        }
    }
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            cross_type_limit: 5,
            cross_type_strength: 0.6,
            same_type_limit: 3,
            same_type_strength: 0.5,
            temporal_window_secs: 300,
            temporal_limit: 50,
            temporal_strength: 1.0,
            same_file_limit: 3,
            same_file_strength: 0.7,
            semantic_threshold: 0.8,
            semantic_candidates: 10,
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            hop_decay: 0.5,
            min_activation: 0.1,
            max_files: 5,
            seeds_per_file: 3,
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            backfill_batch: 100,
        }
    }
}

/// Returns `~/.mnemos/`, or `./.mnemos` when no home directory is known.
pub fn default_mnemos_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemos")
}

/// Returns the default config file path: `~/.mnemos/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemos_dir().join("config.toml")
}

impl MnemosConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemosConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMOS_DB, MNEMOS_LOG_LEVEL, MNEMOS_EMBEDDING_PROVIDER).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMOS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMOS_LOG_LEVEL") {
            self.log.level = val;
        }
        if let Ok(val) = std::env::var("MNEMOS_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
