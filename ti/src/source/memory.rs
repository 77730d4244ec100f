//! In-memory document source

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{DocumentSource, SourceError, parse_metadata};
use crate::domain::{Document, DocumentMetadata, DocumentStat};

/// Document corpus held in memory, keyed by path
///
/// Used by tests and by hosts that already keep document text in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentSource {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document with the given mtime
    pub async fn insert(&self, path: impl Into<String>, content: impl Into<String>, mtime: i64) {
        let path = path.into();
        let content = content.into();
        debug!(%path, mtime, "MemoryDocumentSource::insert: called");
        let stat = DocumentStat {
            ctime: mtime,
            mtime,
            size: content.len() as u64,
        };
        self.docs
            .write()
            .await
            .insert(path.clone(), Document { path, content, stat });
    }

    pub async fn remove(&self, path: &str) -> bool {
        self.docs.write().await.remove(path).is_some()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn list(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.docs.read().await.keys().cloned().collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<DocumentStat>, SourceError> {
        Ok(self.docs.read().await.get(path).map(|d| d.stat))
    }

    async fn read(&self, path: &str) -> Result<Document, SourceError> {
        self.docs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }

    async fn metadata(&self, path: &str) -> Result<DocumentMetadata, SourceError> {
        let doc = self.read(path).await?;
        parse_metadata(path, &doc.content)
    }
}
