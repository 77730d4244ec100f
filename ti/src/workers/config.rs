//! Worker orchestrator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry, breaker and fallback settings for worker-backed operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Dispatch to the worker pools at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Master switch for any processing; when off every call uses the fallback
    #[serde(default = "default_true")]
    pub processing_enabled: bool,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base; attempt n waits `base_delay * 2^(n-1)`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cumulative failures that trip the circuit breaker
    #[serde(default = "default_max_worker_failures")]
    pub max_worker_failures: u32,

    /// How long a tripped breaker keeps workers disabled
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Concurrent project-data lookups
    #[serde(default = "default_project_concurrency")]
    pub project_concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_worker_failures() -> u32 {
    10
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_project_concurrency() -> usize {
    4
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            processing_enabled: default_true(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_worker_failures: default_max_worker_failures(),
            cooldown_ms: default_cooldown_ms(),
            project_concurrency: default_project_concurrency(),
        }
    }
}

impl WorkersConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkersConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay(), Duration::from_secs(1));
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.max_worker_failures, 10);
    }

    #[test]
    fn test_partial_yaml() {
        let config: WorkersConfig = serde_yaml::from_str("cooldown_ms: 500\nenabled: false\n").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.cooldown(), Duration::from_millis(500));
        assert_eq!(config.max_retries, 3);
    }
}
