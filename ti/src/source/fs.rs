//! Filesystem document source

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{DocumentSource, SourceError, parse_metadata};
use crate::domain::{Document, DocumentMetadata, DocumentStat};

/// Documents under a root directory, addressed by `/`-separated relative paths
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsDocumentSource {
    /// Index markdown files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["md".to_string()],
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn io_error(path: &str, source: std::io::Error) -> SourceError {
        if source.kind() == std::io::ErrorKind::NotFound {
            SourceError::NotFound(path.to_string())
        } else {
            SourceError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

fn millis(time: std::io::Result<SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
}

fn to_stat(meta: &std::fs::Metadata) -> DocumentStat {
    let mtime = millis(meta.modified()).unwrap_or(0);
    DocumentStat {
        ctime: millis(meta.created()).unwrap_or(mtime),
        mtime,
        size: meta.len(),
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn list(&self) -> Result<Vec<String>, SourceError> {
        debug!(root = %self.root.display(), "FsDocumentSource::list: called");
        let root = self.root.clone();
        let extensions = self.extensions.clone();

        tokio::task::spawn_blocking(move || {
            let mut paths = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let matches_ext = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| extensions.iter().any(|x| x == e));
                if !matches_ext {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect();
                    paths.push(parts.join("/"));
                }
            }
            paths.sort();
            paths
        })
        .await
        .map_err(|e| SourceError::Io {
            path: self.root.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })
    }

    async fn stat(&self, path: &str) -> Result<Option<DocumentStat>, SourceError> {
        match tokio::fs::metadata(self.full_path(path)).await {
            Ok(meta) if meta.is_file() => Ok(Some(to_stat(&meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(path, e)),
        }
    }

    async fn read(&self, path: &str) -> Result<Document, SourceError> {
        let full = self.full_path(path);
        let meta = tokio::fs::metadata(&full).await.map_err(|e| Self::io_error(path, e))?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        Ok(Document {
            path: path.to_string(),
            content,
            stat: to_stat(&meta),
        })
    }

    async fn metadata(&self, path: &str) -> Result<DocumentMetadata, SourceError> {
        let doc = self.read(path).await?;
        parse_metadata(path, &doc.content)
    }
}
