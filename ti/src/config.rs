//! TaskIndex configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::augment::AugmentConfig;
use crate::filter::FilterConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::pool::PoolConfig;
use crate::project::ProjectConfig;
use crate::repository::RepositoryConfig;
use crate::workers::WorkersConfig;

/// Main TaskIndex configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Parse worker pool
    pub pool: PoolConfig,

    /// Retry, circuit breaker and fallback
    pub workers: WorkersConfig,

    /// Debounce, scan and restore timing
    pub orchestrator: OrchestratorConfig,

    /// Index snapshot persistence
    pub repository: RepositoryConfig,

    /// Task augmentation
    pub augment: AugmentConfig,

    /// Project resolution
    pub project: ProjectConfig,

    /// Inclusion filter
    pub filter: FilterConfig,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.taskindex.yml`, then
    /// `<config_dir>/taskindex/taskindex.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(".taskindex.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("taskindex").join("taskindex.yml"));
        }
        candidates
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/taskindex on Linux)
        let path = dirs::data_dir()
            .map(|d| d.join("taskindex"))
            .unwrap_or_else(|| PathBuf::from(".taskindex"))
            .join("index.db")
            .to_string_lossy()
            .into_owned();

        Self { path }
    }
}
