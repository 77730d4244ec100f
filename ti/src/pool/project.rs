//! Bounded-concurrency project data computation

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::messages::{PoolError, PoolResult};
use crate::domain::ProjectData;
use crate::source::ProjectResolver;

/// Runs project resolution with at most `concurrency` lookups in flight
pub struct ProjectDataPool {
    resolver: Arc<dyn ProjectResolver>,
    permits: Arc<Semaphore>,
    active: AtomicBool,
}

impl ProjectDataPool {
    pub fn new(resolver: Arc<dyn ProjectResolver>, concurrency: usize) -> Self {
        Self {
            resolver,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            active: AtomicBool::new(true),
        }
    }

    pub async fn compute(&self, path: &str) -> PoolResult<ProjectData> {
        debug!(%path, "ProjectDataPool::compute: called");
        if !self.active.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }
        let _permit = self.permits.acquire().await.map_err(|_| PoolError::ShutDown)?;
        self.resolver.get(path).await.map_err(|e| PoolError::Project {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Failed lookups are left out of the result; shutdown fails the call
    pub async fn compute_batch(&self, paths: &[String]) -> PoolResult<HashMap<String, ProjectData>> {
        debug!(files = paths.len(), "ProjectDataPool::compute_batch: called");
        let lookups = paths.iter().map(|path| async move { (path.clone(), self.compute(path).await) });
        let mut results = HashMap::with_capacity(paths.len());
        for (path, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(data) => {
                    results.insert(path, data);
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!(%path, error = %e, "Project data failed, leaving it out"),
            }
        }
        Ok(results)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        debug!("ProjectDataPool::shutdown: called");
        self.active.store(false, Ordering::SeqCst);
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ConfigProjectResolver, ProjectConfig};
    use crate::source::MemoryDocumentSource;

    #[tokio::test]
    async fn test_compute_and_shutdown() {
        let source = Arc::new(MemoryDocumentSource::new());
        source.insert("work/a.md", "---\nproject: Apollo\n---\n- [ ] x\n", 1).await;
        let resolver = Arc::new(ConfigProjectResolver::new(ProjectConfig::default(), source));
        let pool = ProjectDataPool::new(resolver, 2);

        let data = pool.compute("work/a.md").await.unwrap();
        assert_eq!(data.project.map(|p| p.name), Some("Apollo".to_string()));

        let batch = pool
            .compute_batch(&["work/a.md".to_string(), "gone.md".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!batch.contains_key("gone.md"));

        pool.shutdown();
        assert!(!pool.is_active());
        assert_eq!(pool.compute("work/a.md").await, Err(PoolError::ShutDown));
    }
}
