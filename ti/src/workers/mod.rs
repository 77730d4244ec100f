//! Fault-tolerant dispatch to the worker pools
//!
//! ```text
//! caller ─▶ WorkerOrchestrator ─▶ breaker open? ──yes──▶ MainThreadFallback
//!                                    │ no
//!                                    ▼
//!                            retry_operation(backoff)
//!                                    │
//!                     ParseDispatcher / ProjectDispatcher
//!                                    │ exhausted
//!                                    ▼
//!                       record failure ─▶ MainThreadFallback
//! ```

mod config;
mod fallback;
mod metrics;
mod orchestrator;
mod retry;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Priority, ProjectData, Task};
use crate::pool::{PoolError, PoolResult, ProjectDataPool, WorkerPool};

pub use config::WorkersConfig;
pub use fallback::MainThreadFallback;
pub use metrics::{OperationKind, OperationMetrics, WorkerMetrics};
pub use orchestrator::WorkerOrchestrator;
pub use retry::{RetryPolicy, retry_operation};

/// Errors from worker-orchestrated operations
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Fallback parse of {path} failed: {message}")]
    Fallback { path: String, message: String },
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Anything that can parse files off the caller's task
#[async_trait]
pub trait ParseDispatcher: Send + Sync {
    async fn parse_file(&self, path: &str, priority: Priority) -> PoolResult<Vec<Task>>;

    async fn parse_batch(&self, paths: &[String], priority: Priority) -> PoolResult<HashMap<String, Vec<Task>>>;

    async fn shutdown(&self) -> PoolResult<()>;
}

/// Anything that can compute project data
#[async_trait]
pub trait ProjectDispatcher: Send + Sync {
    async fn compute(&self, path: &str) -> PoolResult<ProjectData>;

    async fn compute_batch(&self, paths: &[String]) -> PoolResult<HashMap<String, ProjectData>>;

    fn shutdown(&self);
}

#[async_trait]
impl ParseDispatcher for WorkerPool {
    async fn parse_file(&self, path: &str, priority: Priority) -> PoolResult<Vec<Task>> {
        WorkerPool::parse_file(self, path, priority).await
    }

    async fn parse_batch(&self, paths: &[String], priority: Priority) -> PoolResult<HashMap<String, Vec<Task>>> {
        WorkerPool::parse_batch(self, paths, priority).await
    }

    async fn shutdown(&self) -> PoolResult<()> {
        WorkerPool::shutdown(self).await
    }
}

#[async_trait]
impl ProjectDispatcher for ProjectDataPool {
    async fn compute(&self, path: &str) -> PoolResult<ProjectData> {
        ProjectDataPool::compute(self, path).await
    }

    async fn compute_batch(&self, paths: &[String]) -> PoolResult<HashMap<String, ProjectData>> {
        ProjectDataPool::compute_batch(self, paths).await
    }

    fn shutdown(&self) {
        ProjectDataPool::shutdown(self)
    }
}

#[cfg(test)]
pub mod mock {
    //! Scriptable dispatchers for tests

    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then returns one task per path
    #[derive(Default)]
    pub struct MockParseDispatcher {
        pub calls: AtomicUsize,
        pub batch_calls: AtomicUsize,
        failures: AtomicU32,
    }

    impl MockParseDispatcher {
        pub fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn outcome(&self, path: &str) -> PoolResult<Vec<Task>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(PoolError::Exhausted {
                    path: path.to_string(),
                    attempts: 1,
                    message: "mock failure".into(),
                });
            }
            Ok(vec![Task::new(format!("{path}-L0"), path, 0, "from worker")])
        }
    }

    #[async_trait]
    impl ParseDispatcher for MockParseDispatcher {
        async fn parse_file(&self, path: &str, _priority: Priority) -> PoolResult<Vec<Task>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome(path)
        }

        async fn parse_batch(&self, paths: &[String], _priority: Priority) -> PoolResult<HashMap<String, Vec<Task>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            paths.iter().map(|p| Ok((p.clone(), self.outcome(p)?))).collect()
        }

        async fn shutdown(&self) -> PoolResult<()> {
            Ok(())
        }
    }

    /// Resolves every path to a fixed project name
    pub struct MockProjectDispatcher {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl MockProjectDispatcher {
        pub fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl ProjectDispatcher for MockProjectDispatcher {
        async fn compute(&self, path: &str) -> PoolResult<ProjectData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PoolError::Project {
                    path: path.to_string(),
                    message: "mock failure".into(),
                });
            }
            Ok(ProjectData {
                project: Some(crate::domain::ProjectRef {
                    name: "Mock".into(),
                    source: crate::domain::ProjectSource::Metadata,
                    read_only: false,
                }),
                ..ProjectData::default()
            })
        }

        async fn compute_batch(&self, paths: &[String]) -> PoolResult<HashMap<String, ProjectData>> {
            let mut out = HashMap::new();
            for path in paths {
                out.insert(path.clone(), self.compute(path).await?);
            }
            Ok(out)
        }

        fn shutdown(&self) {}
    }
}
