//! Configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub similarity: SimilarityConfig,
}

/// Store-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trellis")
        .join("tasks.db")
}

/// Similarity and deduplication defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Minimum score for a similarity/duplicate match.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Whether the fuzzy edit-distance pass runs by default.
    #[serde(default = "default_fuzzy")]
    pub fuzzy: bool,

    /// Minimum group similarity for unattended merging.
    #[serde(default = "default_auto_merge_threshold")]
    pub auto_merge_threshold: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            fuzzy: default_fuzzy(),
            auto_merge_threshold: default_auto_merge_threshold(),
        }
    }
}

fn default_threshold() -> f64 {
    0.3
}

fn default_fuzzy() -> bool {
    true
}

fn default_auto_merge_threshold() -> f64 {
    0.8
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default locations or return defaults.
    pub fn load_or_default() -> Self {
        // Try .trellis/config.yaml in the working directory first
        let mut config = Self::load(".trellis/config.yaml").unwrap_or_default();

        if let Ok(db_path) = std::env::var("TRELLIS_DB_PATH") {
            config.store.db_path = PathBuf::from(db_path);
        }

        config
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.store.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
