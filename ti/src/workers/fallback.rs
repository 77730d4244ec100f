//! Minimal inline processing used when workers are unavailable

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{WorkerError, WorkerResult};
use crate::domain::{ProjectData, Task};
use crate::pool::WorkerDeps;
use crate::source::{DocumentSource, TaskParser};

/// Parses on the calling task with no retries and no synthetic tasks
pub struct MainThreadFallback {
    source: Arc<dyn DocumentSource>,
    parser: Arc<dyn TaskParser>,
}

impl MainThreadFallback {
    pub fn new(deps: &WorkerDeps) -> Self {
        Self {
            source: Arc::clone(&deps.source),
            parser: Arc::clone(&deps.parser),
        }
    }

    pub async fn parse_file(&self, path: &str) -> WorkerResult<Vec<Task>> {
        debug!(%path, "MainThreadFallback::parse_file: called");
        let fail = |message: String| WorkerError::Fallback {
            path: path.to_string(),
            message,
        };
        let doc = self.source.read(path).await.map_err(|e| fail(e.to_string()))?;
        let metadata = self.source.metadata(path).await.unwrap_or_default();
        self.parser
            .parse(path, &doc.content, &metadata)
            .map_err(|e| fail(e.to_string()))
    }

    /// Sequential; a failing file is left out of the result
    pub async fn parse_batch(&self, paths: &[String]) -> HashMap<String, Vec<Task>> {
        debug!(files = paths.len(), "MainThreadFallback::parse_batch: called");
        let mut results = HashMap::with_capacity(paths.len());
        for path in paths {
            match self.parse_file(path).await {
                Ok(tasks) => {
                    results.insert(path.clone(), tasks);
                }
                Err(e) => warn!(%path, error = %e, "Fallback parse failed, leaving it out"),
            }
        }
        results
    }

    /// Project data has no inline equivalent
    pub fn project_data(&self, path: &str) -> Option<ProjectData> {
        debug!(%path, "MainThreadFallback::project_data: no fallback available");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CheckboxParser, MemoryDocumentSource};

    #[tokio::test]
    async fn test_fallback_parses_inline() {
        let source = Arc::new(MemoryDocumentSource::new());
        source.insert("a.md", "- [ ] one\n- [x] two\n", 1).await;
        let deps = WorkerDeps {
            source: source.clone(),
            parser: Arc::new(CheckboxParser::new().unwrap()),
            metadata_tasks: None,
        };
        let fallback = MainThreadFallback::new(&deps);

        assert_eq!(fallback.parse_file("a.md").await.unwrap().len(), 2);
        assert!(fallback.parse_file("missing.md").await.is_err());

        let batch = fallback
            .parse_batch(&["a.md".to_string(), "missing.md".to_string()])
            .await;
        assert_eq!(batch["a.md"].len(), 2);
        assert!(!batch.contains_key("missing.md"));
        assert!(fallback.project_data("a.md").is_none());
    }
}
