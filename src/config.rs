use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::MotifError;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MotifConfig {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub ranking: RankingConfig,
    pub learning: LearningConfig,
    pub detector: DetectorConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Fixed number of bucket slots. Never grows after construction.
    pub bucket_count: usize,
    pub ngram_size: usize,
    pub max_candidates: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RankingConfig {
    pub lexical_weight: f64,
    pub context_weight: f64,
    pub learned_weight: f64,
    pub recency_weight: f64,
    pub recency_half_life_days: f64,
    /// Context credit for a candidate that appears in the recently used ids.
    pub recent_id_credit: f64,
    pub default_max_results: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LearningConfig {
    pub learning_rate: f64,
    pub initial_weight: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectorConfig {
    pub alert_threshold: usize,
    pub window_hours: u64,
    pub sample_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub send_timeout_ms: u64,
}

impl Default for MotifConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            storage: StorageConfig::default(),
            index: IndexConfig::default(),
            ranking: RankingConfig::default(),
            learning: LearningConfig::default(),
            detector: DetectorConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_motif_dir()
            .join("patterns.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bucket_count: 1_000_000,
            ngram_size: 3,
            max_candidates: 64,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.3,
            context_weight: 0.4,
            learned_weight: 0.2,
            recency_weight: 0.1,
            recency_half_life_days: 7.0,
            recent_id_credit: 0.25,
            default_max_results: 5,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            initial_weight: 0.5,
        }
    }
}

/// Longest failure-clustering window accepted, one century.
pub const MAX_WINDOW_HOURS: u64 = 24 * 365 * 100;

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 5,
            window_hours: 24,
            sample_size: 5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            send_timeout_ms: 5000,
        }
    }
}

/// Returns `~/.motif/`, or `./.motif/` when no home directory is known.
pub fn default_motif_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".motif")
}

/// Returns the default config file path: `~/.motif/config.toml`
pub fn default_config_path() -> PathBuf {
    default_motif_dir().join("config.toml")
}

impl MotifConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides and validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MotifConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (MOTIF_DB, MOTIF_LOG_LEVEL, MOTIF_CACHE_CAPACITY).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MOTIF_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MOTIF_LOG_LEVEL") {
            self.general.log_level = val;
        }
        if let Ok(val) = std::env::var("MOTIF_CACHE_CAPACITY") {
            match val.parse() {
                Ok(capacity) => self.cache.capacity = capacity,
                Err(_) => tracing::warn!(value = %val, "ignoring non-numeric MOTIF_CACHE_CAPACITY"),
            }
        }
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> std::result::Result<(), MotifError> {
        let r = &self.ranking;
        let weights = [
            r.lexical_weight,
            r.context_weight,
            r.learned_weight,
            r.recency_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(MotifError::Config("ranking weights must be non-negative".into()));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(MotifError::Config(format!(
                "ranking weights must sum to 1.0, got {sum}"
            )));
        }
        if r.recency_half_life_days <= 0.0 {
            return Err(MotifError::Config("recency half-life must be positive".into()));
        }
        if self.index.bucket_count == 0 {
            return Err(MotifError::Config("index.bucket_count must be > 0".into()));
        }
        if self.index.ngram_size == 0 {
            return Err(MotifError::Config("index.ngram_size must be > 0".into()));
        }
        if self.index.max_candidates == 0 {
            return Err(MotifError::Config("index.max_candidates must be > 0".into()));
        }
        let lr = self.learning.learning_rate;
        if !(lr > 0.0 && lr <= 1.0) {
            return Err(MotifError::Config(format!(
                "learning.learning_rate must be in (0, 1], got {lr}"
            )));
        }
        if !(0.0..=1.0).contains(&self.learning.initial_weight) {
            return Err(MotifError::Config(
                "learning.initial_weight must be in [0, 1]".into(),
            ));
        }
        if self.detector.alert_threshold == 0 {
            return Err(MotifError::Config("detector.alert_threshold must be > 0".into()));
        }
        let window = self.detector.window_hours;
        if window == 0 || window > MAX_WINDOW_HOURS {
            return Err(MotifError::Config(format!(
                "detector.window_hours must be in 1..={MAX_WINDOW_HOURS}, got {window}"
            )));
        }
        if self.cache.capacity == 0 {
            return Err(MotifError::Config("cache.capacity must be > 0".into()));
        }
        if self.queue.capacity == 0 {
            return Err(MotifError::Config("queue.capacity must be > 0".into()));
        }
        Ok(())
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
