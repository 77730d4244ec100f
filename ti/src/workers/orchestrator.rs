//! WorkerOrchestrator - retry, circuit breaker and fallback around the pools

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::fallback::MainThreadFallback;
use super::metrics::{OperationKind, WorkerMetrics};
use super::retry::{RetryPolicy, retry_operation};
use super::{ParseDispatcher, ProjectDispatcher, WorkerResult, WorkersConfig};
use crate::domain::{Priority, ProjectData, Task};

#[derive(Debug)]
struct BreakerState {
    workers_enabled: bool,
    processing_enabled: bool,
    failures: u32,
    disabled_until: Option<Instant>,
}

/// Uniform retry, breaker and fallback policy for worker-backed operations
pub struct WorkerOrchestrator {
    parse: Arc<dyn ParseDispatcher>,
    project: Arc<dyn ProjectDispatcher>,
    fallback: MainThreadFallback,
    config: WorkersConfig,
    breaker: Mutex<BreakerState>,
    metrics: Mutex<WorkerMetrics>,
}

impl WorkerOrchestrator {
    pub fn new(
        config: WorkersConfig,
        parse: Arc<dyn ParseDispatcher>,
        project: Arc<dyn ProjectDispatcher>,
        fallback: MainThreadFallback,
    ) -> Self {
        debug!(?config, "WorkerOrchestrator::new: called");
        let breaker = BreakerState {
            workers_enabled: config.enabled,
            processing_enabled: config.processing_enabled,
            failures: 0,
            disabled_until: None,
        };
        Self {
            parse,
            project,
            fallback,
            config,
            breaker: Mutex::new(breaker),
            metrics: Mutex::new(WorkerMetrics::default()),
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            base_delay: self.config.base_delay(),
        }
    }

    pub async fn parse_file(&self, path: &str, priority: Priority) -> WorkerResult<Vec<Task>> {
        debug!(%path, %priority, "WorkerOrchestrator::parse_file: called");
        if self.dispatch_allowed().await {
            let start = Instant::now();
            let result = retry_operation(&self.policy(), "parse_file", |_| self.parse.parse_file(path, priority)).await;
            match result {
                Ok(tasks) => {
                    self.record_success(OperationKind::TaskParsing, start).await;
                    return Ok(tasks);
                }
                Err(e) => {
                    warn!(%path, error = %e, "Worker parse failed, using fallback");
                    self.record_failure(OperationKind::TaskParsing, start).await;
                }
            }
        }
        self.count_fallback().await;
        self.fallback.parse_file(path).await
    }

    pub async fn parse_batch(&self, paths: &[String], priority: Priority) -> WorkerResult<HashMap<String, Vec<Task>>> {
        debug!(files = paths.len(), %priority, "WorkerOrchestrator::parse_batch: called");
        if self.dispatch_allowed().await {
            let start = Instant::now();
            let result = retry_operation(&self.policy(), "parse_batch", |_| self.parse.parse_batch(paths, priority)).await;
            match result {
                Ok(tasks) => {
                    self.record_success(OperationKind::TaskParsing, start).await;
                    return Ok(tasks);
                }
                Err(e) => {
                    warn!(files = paths.len(), error = %e, "Worker batch parse failed, using fallback");
                    self.record_failure(OperationKind::TaskParsing, start).await;
                }
            }
        }
        self.count_fallback().await;
        Ok(self.fallback.parse_batch(paths).await)
    }

    /// `None` when project data could not be computed
    pub async fn compute_project_data(&self, path: &str) -> Option<ProjectData> {
        debug!(%path, "WorkerOrchestrator::compute_project_data: called");
        if self.dispatch_allowed().await {
            let start = Instant::now();
            let result = retry_operation(&self.policy(), "compute_project_data", |_| self.project.compute(path)).await;
            match result {
                Ok(data) => {
                    self.record_success(OperationKind::ProjectData, start).await;
                    return Some(data);
                }
                Err(e) => {
                    warn!(%path, error = %e, "Project data failed, using fallback");
                    self.record_failure(OperationKind::ProjectData, start).await;
                }
            }
        }
        self.count_fallback().await;
        self.fallback.project_data(path)
    }

    /// Paths without project data are absent from the result
    pub async fn compute_project_data_batch(&self, paths: &[String]) -> HashMap<String, ProjectData> {
        debug!(files = paths.len(), "WorkerOrchestrator::compute_project_data_batch: called");
        if self.dispatch_allowed().await {
            let start = Instant::now();
            let result = retry_operation(&self.policy(), "compute_project_data_batch", |_| {
                self.project.compute_batch(paths)
            })
            .await;
            match result {
                Ok(data) => {
                    self.record_success(OperationKind::ProjectData, start).await;
                    return data;
                }
                Err(e) => {
                    warn!(files = paths.len(), error = %e, "Project data batch failed, using fallback");
                    self.record_failure(OperationKind::ProjectData, start).await;
                }
            }
        }
        self.count_fallback().await;
        paths
            .iter()
            .filter_map(|path| Some((path.clone(), self.fallback.project_data(path)?)))
            .collect()
    }

    /// Manual override; enabling also resets the breaker
    pub async fn set_workers_enabled(&self, enabled: bool) {
        info!(enabled, "WorkerOrchestrator::set_workers_enabled: called");
        let mut breaker = self.breaker.lock().await;
        breaker.workers_enabled = enabled;
        if enabled {
            breaker.failures = 0;
            breaker.disabled_until = None;
        }
    }

    pub async fn set_processing_enabled(&self, enabled: bool) {
        info!(enabled, "WorkerOrchestrator::set_processing_enabled: called");
        self.breaker.lock().await.processing_enabled = enabled;
    }

    pub async fn metrics(&self) -> WorkerMetrics {
        let mut snapshot = self.metrics.lock().await.clone();
        let breaker = self.breaker.lock().await;
        snapshot.failure_count = breaker.failures;
        snapshot.workers_enabled = breaker.workers_enabled;
        snapshot.breaker_open = breaker.disabled_until.is_some_and(|until| Instant::now() < until);
        snapshot
    }

    pub async fn reset_metrics(&self) {
        debug!("WorkerOrchestrator::reset_metrics: called");
        *self.metrics.lock().await = WorkerMetrics::default();
    }

    pub async fn shutdown(&self) {
        info!("Shutting down worker orchestrator");
        if let Err(e) = self.parse.shutdown().await {
            debug!(error = %e, "Parse dispatcher already stopped");
        }
        self.project.shutdown();
    }

    /// Workers may be used; re-enables lazily once the cooldown has passed
    async fn dispatch_allowed(&self) -> bool {
        let mut breaker = self.breaker.lock().await;
        if !breaker.workers_enabled || !breaker.processing_enabled {
            return false;
        }
        if let Some(until) = breaker.disabled_until {
            if Instant::now() < until {
                return false;
            }
            info!("Circuit breaker cooldown elapsed, re-enabling workers");
            breaker.disabled_until = None;
            breaker.failures = 0;
        }
        true
    }

    async fn record_success(&self, kind: OperationKind, start: Instant) {
        self.metrics.lock().await.kind_mut(kind).record(start.elapsed(), true);
    }

    async fn record_failure(&self, kind: OperationKind, start: Instant) {
        self.metrics.lock().await.kind_mut(kind).record(start.elapsed(), false);
        let mut breaker = self.breaker.lock().await;
        breaker.failures += 1;
        if breaker.failures >= self.config.max_worker_failures && breaker.disabled_until.is_none() {
            warn!(
                failures = breaker.failures,
                cooldown_ms = self.config.cooldown_ms,
                "Circuit breaker tripped, disabling workers"
            );
            breaker.disabled_until = Some(Instant::now() + self.config.cooldown());
            self.metrics.lock().await.breaker_trips += 1;
        }
    }

    async fn count_fallback(&self) {
        self.metrics.lock().await.fallbacks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerDeps;
    use crate::source::{CheckboxParser, MemoryDocumentSource};
    use crate::workers::mock::{MockParseDispatcher, MockProjectDispatcher};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn fallback() -> MainThreadFallback {
        let source = Arc::new(MemoryDocumentSource::new());
        source.insert("a.md", "- [ ] inline\n", 1).await;
        let deps = WorkerDeps {
            source,
            parser: Arc::new(CheckboxParser::new().unwrap()),
            metadata_tasks: None,
        };
        MainThreadFallback::new(&deps)
    }

    fn config(max_retries: u32, max_worker_failures: u32) -> WorkersConfig {
        WorkersConfig {
            max_retries,
            base_delay_ms: 100,
            max_worker_failures,
            cooldown_ms: 1000,
            ..WorkersConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let parse = Arc::new(MockParseDispatcher::failing(2));
        let orchestrator = WorkerOrchestrator::new(
            config(3, 10),
            parse.clone(),
            Arc::new(MockProjectDispatcher::new(false)),
            fallback().await,
        );

        let tasks = orchestrator.parse_file("a.md", Priority::High).await.unwrap();
        assert_eq!(tasks[0].content, "from worker");
        assert_eq!(parse.calls(), 3);

        let metrics = orchestrator.metrics().await;
        assert_eq!(metrics.task_parsing.successes, 1);
        assert_eq!(metrics.fallbacks, 0);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_use_fallback() {
        let parse = Arc::new(MockParseDispatcher::failing(100));
        let orchestrator = WorkerOrchestrator::new(
            config(1, 10),
            parse.clone(),
            Arc::new(MockProjectDispatcher::new(false)),
            fallback().await,
        );

        let tasks = orchestrator.parse_file("a.md", Priority::Normal).await.unwrap();
        assert_eq!(tasks[0].content, "inline");
        assert_eq!(parse.calls(), 2);

        let metrics = orchestrator.metrics().await;
        assert_eq!(metrics.task_parsing.failures, 1);
        assert_eq!(metrics.fallbacks, 1);
        assert_eq!(metrics.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_trips_and_recovers() {
        let parse = Arc::new(MockParseDispatcher::failing(100));
        let orchestrator = WorkerOrchestrator::new(
            config(0, 2),
            parse.clone(),
            Arc::new(MockProjectDispatcher::new(false)),
            fallback().await,
        );

        orchestrator.parse_file("a.md", Priority::Normal).await.unwrap();
        orchestrator.parse_file("a.md", Priority::Normal).await.unwrap();
        assert_eq!(parse.calls(), 2);
        let metrics = orchestrator.metrics().await;
        assert!(metrics.breaker_open);
        assert_eq!(metrics.breaker_trips, 1);

        // Dispatch stays off during the cooldown
        orchestrator.parse_file("a.md", Priority::Normal).await.unwrap();
        tokio::time::advance(Duration::from_millis(900)).await;
        orchestrator.parse_file("a.md", Priority::Normal).await.unwrap();
        assert_eq!(parse.calls(), 2);

        tokio::time::advance(Duration::from_millis(200)).await;
        orchestrator.parse_file("a.md", Priority::Normal).await.unwrap();
        assert_eq!(parse.calls(), 3);
        let metrics = orchestrator.metrics().await;
        assert_eq!(metrics.failure_count, 1);
        assert!(!metrics.breaker_open);
        assert_eq!(metrics.fallbacks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_override() {
        let parse = Arc::new(MockParseDispatcher::failing(0));
        let orchestrator = WorkerOrchestrator::new(
            config(0, 10),
            parse.clone(),
            Arc::new(MockProjectDispatcher::new(false)),
            fallback().await,
        );

        orchestrator.set_workers_enabled(false).await;
        let tasks = orchestrator.parse_file("a.md", Priority::Low).await.unwrap();
        assert_eq!(tasks[0].content, "inline");
        assert_eq!(parse.calls(), 0);

        orchestrator.set_workers_enabled(true).await;
        orchestrator.parse_file("a.md", Priority::Low).await.unwrap();
        assert_eq!(parse.calls(), 1);

        orchestrator.set_processing_enabled(false).await;
        orchestrator.parse_file("a.md", Priority::Low).await.unwrap();
        assert_eq!(parse.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_project_data() {
        let project = Arc::new(MockProjectDispatcher::new(false));
        let orchestrator = WorkerOrchestrator::new(
            config(0, 10),
            Arc::new(MockParseDispatcher::default()),
            project.clone(),
            fallback().await,
        );
        let data = orchestrator.compute_project_data("a.md").await.unwrap();
        assert_eq!(data.project.unwrap().name, "Mock");

        let batch = orchestrator
            .compute_project_data_batch(&["a.md".to_string(), "b.md".to_string()])
            .await;
        assert_eq!(batch.len(), 2);
        assert_eq!(project.calls.load(Ordering::SeqCst), 3);

        let failing = WorkerOrchestrator::new(
            config(0, 10),
            Arc::new(MockParseDispatcher::default()),
            Arc::new(MockProjectDispatcher::new(true)),
            fallback().await,
        );
        assert!(failing.compute_project_data("a.md").await.is_none());
        assert!(failing.compute_project_data_batch(&["a.md".to_string()]).await.is_empty());

        orchestrator.reset_metrics().await;
        assert_eq!(orchestrator.metrics().await.project_data.total_operations, 0);
    }
}
