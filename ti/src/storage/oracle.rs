//! Raw-cache validity oracle for the worker pool

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Storage, is_raw_valid};
use crate::domain::Task;
use crate::pool::CacheOracle;
use crate::source::DocumentSource;

/// Answers "is the raw cache still valid for this file" from persisted records
pub struct RawCacheOracle {
    storage: Storage,
    source: Arc<dyn DocumentSource>,
}

impl RawCacheOracle {
    pub fn new(storage: Storage, source: Arc<dyn DocumentSource>) -> Self {
        Self { storage, source }
    }
}

#[async_trait]
impl CacheOracle for RawCacheOracle {
    async fn cached_tasks(&self, path: &str) -> Option<Vec<Task>> {
        let record = match self.storage.load_raw(path).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                debug!(%path, error = %e, "RawCacheOracle: unreadable record treated as miss");
                return None;
            }
        };
        let doc = self.source.read(path).await.ok()?;
        is_raw_valid(&record, &doc.content, doc.stat.mtime).then_some(record.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryDocumentSource;
    use taskstore::MemoryStore;

    #[tokio::test]
    async fn test_oracle_hit_and_miss() {
        let storage = Storage::new(Arc::new(MemoryStore::new()));
        let source = Arc::new(MemoryDocumentSource::new());
        source.insert("a.md", "- [ ] one\n", 10).await;
        let tasks = vec![Task::new("a-L0", "a.md", 0, "one")];
        storage.store_raw("a.md", &tasks, "- [ ] one\n", 10).await.unwrap();

        let oracle = RawCacheOracle::new(storage, source.clone());
        assert_eq!(oracle.cached_tasks("a.md").await, Some(tasks));
        assert_eq!(oracle.cached_tasks("b.md").await, None);

        source.insert("a.md", "- [ ] two\n", 10).await;
        assert_eq!(oracle.cached_tasks("a.md").await, None);
    }
}
