//! Orchestrator timing and batching configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Quiet period per path before a changed file is processed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Files per chunk during the initial scan and rebuilds
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Chunks at or below this size are processed file by file
    #[serde(default = "default_small_batch_threshold")]
    pub small_batch_threshold: usize,

    /// Trailing-edge delay before a restore pass after a filter change
    #[serde(default = "default_restore_debounce_ms")]
    pub restore_debounce_ms: u64,

    #[serde(default = "default_restore_batch_size")]
    pub restore_batch_size: usize,

    /// Pause between restore batches
    #[serde(default = "default_restore_interval_ms")]
    pub restore_interval_ms: u64,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_scan_batch_size() -> usize {
    50
}

fn default_small_batch_threshold() -> usize {
    5
}

fn default_restore_debounce_ms() -> u64 {
    500
}

fn default_restore_batch_size() -> usize {
    50
}

fn default_restore_interval_ms() -> u64 {
    100
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            scan_batch_size: default_scan_batch_size(),
            small_batch_threshold: default_small_batch_threshold(),
            restore_debounce_ms: default_restore_debounce_ms(),
            restore_batch_size: default_restore_batch_size(),
            restore_interval_ms: default_restore_interval_ms(),
        }
    }
}

impl OrchestratorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn restore_debounce(&self) -> Duration {
        Duration::from_millis(self.restore_debounce_ms)
    }

    pub fn restore_interval(&self) -> Duration {
        Duration::from_millis(self.restore_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.scan_batch_size, 50);
        assert_eq!(config.small_batch_threshold, 5);
        assert_eq!(config.restore_debounce(), Duration::from_millis(500));
        assert_eq!(config.restore_batch_size, 50);
        assert_eq!(config.restore_interval(), Duration::from_millis(100));
    }
}
