//! Worker pool configuration

use serde::{Deserialize, Serialize};

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on live worker slots
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Target CPU utilization (0.1 - 1.0) used for post-assignment throttling
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,

    /// Requeues allowed per file after a worker or parse failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Files per sub-batch in `parse_batch`
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Cap on concurrently running sub-batches
    #[serde(default = "default_max_batch_concurrency")]
    pub max_batch_concurrency: usize,

    /// Command channel capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .clamp(1, 4)
}

fn default_target_utilization() -> f64 {
    0.75
}

fn default_max_retries() -> u32 {
    2
}

fn default_batch_size() -> usize {
    10
}

fn default_max_batch_concurrency() -> usize {
    5
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            target_utilization: default_target_utilization(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            max_batch_concurrency: default_max_batch_concurrency(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PoolConfig {
    /// Sub-batches allowed in flight for a pool of `workers` slots
    pub fn batch_concurrency(&self, workers: usize) -> usize {
        (workers * 2).min(self.max_batch_concurrency).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!((1..=4).contains(&config.max_workers));
        assert_eq!(config.target_utilization, 0.75);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_batch_concurrency_is_capped() {
        let config = PoolConfig::default();
        assert_eq!(config.batch_concurrency(1), 2);
        assert_eq!(config.batch_concurrency(2), 4);
        assert_eq!(config.batch_concurrency(8), 5);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: PoolConfig = serde_yaml::from_str("max_workers: 3\n").unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.max_retries, 2);
    }
}
