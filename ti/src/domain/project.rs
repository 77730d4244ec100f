//! Project descriptors produced by the project resolver

use serde::{Deserialize, Serialize};

use super::document::Frontmatter;

/// Where a project assignment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectSource {
    Metadata,
    PathMapping,
    ConfigFile,
    DefaultNaming,
}

/// Resolved project reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub name: String,
    pub source: ProjectSource,
    /// Derived assignments cannot be edited through the task
    #[serde(default)]
    pub read_only: bool,
}

/// Project data cached per path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    pub project: Option<ProjectRef>,
    /// Metadata inherited from the project (config file frontmatter)
    #[serde(default)]
    pub enhanced_metadata: Frontmatter,
}
