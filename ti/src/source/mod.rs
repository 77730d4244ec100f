//! Collaborator contracts
//!
//! The indexing core never touches a concrete host API. Everything it needs
//! from the outside world comes through the traits in this module:
//!
//! - [`DocumentSource`] - list, stat, read and cached metadata of documents
//! - [`TaskParser`] - the external task-markup parser (CPU bound, sync)
//! - [`MetadataTaskSource`] - synthetic tasks derived from file metadata
//! - [`ProjectResolver`] - path -> project descriptor, with a clearable cache
//! - [`InclusionFilter`] - path inclusion predicate per task scope

mod checkbox;
mod fs;
mod memory;

pub use checkbox::{CheckboxParser, FrontmatterTaskSource};
pub use fs::FsDocumentSource;
pub use memory::MemoryDocumentSource;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Document, DocumentMetadata, DocumentStat, ProjectData, Task};

/// Errors raised by collaborators
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata in {path}: {message}")]
    Metadata { path: String, message: String },

    #[error("Project resolution failed for {path}: {message}")]
    Project { path: String, message: String },
}

/// A parser rejected a document
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// Read access to the document corpus
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Every indexable document path
    async fn list(&self) -> Result<Vec<String>, SourceError>;

    /// Stat of a document, `None` if it does not exist
    async fn stat(&self, path: &str) -> Result<Option<DocumentStat>, SourceError>;

    /// Full text plus stat
    async fn read(&self, path: &str) -> Result<Document, SourceError>;

    /// Cached frontmatter and structural listing
    async fn metadata(&self, path: &str) -> Result<DocumentMetadata, SourceError>;
}

/// External task-markup parser
///
/// Runs on blocking worker threads, so implementations must be pure.
pub trait TaskParser: Send + Sync {
    fn parse(&self, path: &str, content: &str, metadata: &DocumentMetadata) -> Result<Vec<Task>, ParseError>;
}

/// Produces tasks from file metadata rather than inline markup
pub trait MetadataTaskSource: Send + Sync {
    fn tasks_for(&self, path: &str, content: &str, metadata: &DocumentMetadata) -> Vec<Task>;
}

/// Resolves the project a document belongs to
#[async_trait]
pub trait ProjectResolver: Send + Sync {
    async fn get(&self, path: &str) -> Result<ProjectData, SourceError>;

    /// Drop cached resolutions; `None` clears everything
    async fn clear_cache(&self, paths: Option<&[String]>);
}

/// Which kind of task a filter decision applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterScope {
    Inline,
    File,
    Both,
}

/// Path inclusion predicate
pub trait InclusionFilter: Send + Sync {
    fn should_include(&self, path: &str, scope: FilterScope) -> bool;
}

/// Filter that includes everything
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAll;

impl InclusionFilter for IncludeAll {
    fn should_include(&self, _path: &str, _scope: FilterScope) -> bool {
        true
    }
}

/// Split leading YAML frontmatter from a markdown body
///
/// Returns the YAML text (without fences) when the document starts with a
/// `---` line and has a closing `---` line.
pub fn split_frontmatter(content: &str) -> Option<&str> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

/// Parse frontmatter and headings out of markdown text
pub fn parse_metadata(path: &str, content: &str) -> Result<DocumentMetadata, SourceError> {
    let frontmatter = match split_frontmatter(content) {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml).map_err(|e| SourceError::Metadata {
            path: path.to_string(),
            message: e.to_string(),
        })?,
        _ => Default::default(),
    };

    let headings = content
        .lines()
        .enumerate()
        .filter_map(|(line, text)| {
            let trimmed = text.trim_start();
            let level = trimmed.chars().take_while(|c| *c == '#').count();
            if (1..=6).contains(&level) && trimmed[level..].starts_with(' ') {
                Some(crate::domain::Heading {
                    level,
                    text: trimmed[level..].trim().to_string(),
                    line,
                })
            } else {
                None
            }
        })
        .collect();

    Ok(DocumentMetadata { frontmatter, headings })
}
