//! Host-independent document view
//!
//! These types are all the indexing core knows about a document: a path,
//! a stat triple, its text and its cached frontmatter/headings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Frontmatter as a JSON object with deterministic key order
pub type Frontmatter = BTreeMap<String, serde_json::Value>;

/// File stat, times in unix milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStat {
    pub ctime: i64,
    pub mtime: i64,
    pub size: u64,
}

/// Document text plus stat at read time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: String,
    pub content: String,
    pub stat: DocumentStat,
}

/// A heading in a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub level: usize,
    pub text: String,
    pub line: usize,
}

/// Cached per-file metadata: frontmatter plus a structural listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub frontmatter: Frontmatter,
    #[serde(default)]
    pub headings: Vec<Heading>,
}

impl DocumentMetadata {
    /// String value of a frontmatter key
    pub fn frontmatter_str(&self, key: &str) -> Option<&str> {
        self.frontmatter.get(key).and_then(|v| v.as_str())
    }
}
