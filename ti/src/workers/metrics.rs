//! Worker orchestrator metrics

use std::time::Duration;

use serde::Serialize;

/// Which worker-backed operation a measurement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    TaskParsing,
    ProjectData,
}

/// Counts and latency for one kind of operation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationMetrics {
    pub total_operations: u64,
    pub successes: u64,
    pub failures: u64,
    /// Weighted running average; the weight is capped at 100 samples
    pub average_ms: f64,
}

impl OperationMetrics {
    pub(crate) fn record(&mut self, elapsed: Duration, success: bool) {
        self.total_operations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        let weight = self.total_operations.min(100) as f64;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.average_ms = (self.average_ms * (weight - 1.0) + sample) / weight;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 1.0;
        }
        self.successes as f64 / self.total_operations as f64
    }
}

/// Snapshot returned by `WorkerOrchestrator::metrics`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerMetrics {
    pub task_parsing: OperationMetrics,
    pub project_data: OperationMetrics,
    pub fallbacks: u64,
    pub breaker_trips: u64,
    /// Failures counted toward the breaker since the last reset
    pub failure_count: u32,
    pub workers_enabled: bool,
    pub breaker_open: bool,
}

impl WorkerMetrics {
    pub(crate) fn kind_mut(&mut self, kind: OperationKind) -> &mut OperationMetrics {
        match kind {
            OperationKind::TaskParsing => &mut self.task_parsing,
            OperationKind::ProjectData => &mut self.project_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_average() {
        let mut m = OperationMetrics::default();
        m.record(Duration::from_millis(10), true);
        assert!((m.average_ms - 10.0).abs() < 1e-9);
        m.record(Duration::from_millis(30), false);
        assert!((m.average_ms - 20.0).abs() < 1e-9);
        assert_eq!(m.successes, 1);
        assert_eq!(m.failures, 1);
        assert!((m.success_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_weight_is_capped() {
        let mut m = OperationMetrics::default();
        for _ in 0..200 {
            m.record(Duration::from_millis(10), true);
        }
        m.record(Duration::from_millis(110), true);
        // weight 100: (10 * 99 + 110) / 100
        assert!((m.average_ms - 11.0).abs() < 1e-9);
    }
}
