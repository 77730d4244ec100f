//! Configurable project resolver
//!
//! Resolution order for a document:
//! 1. frontmatter key (`project` by default)
//! 2. nearest project config file (`project.md`) in the document's folder or
//!    an ancestor; its frontmatter becomes the enhanced metadata
//! 3. longest matching path-prefix mapping
//! 4. default naming strategy (file name or folder name), if enabled

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ProjectData, ProjectRef, ProjectSource};
use crate::source::{DocumentSource, ProjectResolver, SourceError};

/// Fallback naming when nothing else assigns a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultNaming {
    #[default]
    None,
    Filename,
    Foldername,
}

/// Path prefix mapped onto a project name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub prefix: String,
    pub project: String,
}

/// Project resolution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub metadata_key: String,
    pub config_file_name: String,
    pub path_mappings: Vec<PathMapping>,
    pub default_naming: DefaultNaming,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            metadata_key: "project".to_string(),
            config_file_name: "project.md".to_string(),
            path_mappings: Vec::new(),
            default_naming: DefaultNaming::None,
        }
    }
}

/// Resolver driven by [`ProjectConfig`], caching results per path
pub struct ConfigProjectResolver {
    config: ProjectConfig,
    source: Arc<dyn DocumentSource>,
    cache: Mutex<HashMap<String, ProjectData>>,
}

impl ConfigProjectResolver {
    pub fn new(config: ProjectConfig, source: Arc<dyn DocumentSource>) -> Self {
        Self {
            config,
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn resolve(&self, path: &str) -> Result<ProjectData, SourceError> {
        let metadata = self.source.metadata(path).await?;
        let mut data = ProjectData::default();

        if let Some(name) = metadata.frontmatter_str(&self.config.metadata_key) {
            data.project = Some(ProjectRef {
                name: name.to_string(),
                source: ProjectSource::Metadata,
                read_only: false,
            });
        }

        if let Some(config_path) = self.find_config_file(path).await? {
            let config_meta = self.source.metadata(&config_path).await?;
            if data.project.is_none()
                && let Some(name) = config_meta.frontmatter_str(&self.config.metadata_key)
            {
                data.project = Some(ProjectRef {
                    name: name.to_string(),
                    source: ProjectSource::ConfigFile,
                    read_only: true,
                });
            }
            data.enhanced_metadata = config_meta.frontmatter;
            data.enhanced_metadata.remove(&self.config.metadata_key);
        }

        if data.project.is_none() {
            data.project = self.mapped_project(path).or_else(|| self.default_project(path));
        }

        Ok(data)
    }

    async fn find_config_file(&self, path: &str) -> Result<Option<String>, SourceError> {
        let mut folder = parent_of(path);
        loop {
            let candidate = if folder.is_empty() {
                self.config.config_file_name.clone()
            } else {
                format!("{}/{}", folder, self.config.config_file_name)
            };
            if candidate != path && self.source.stat(&candidate).await?.is_some() {
                return Ok(Some(candidate));
            }
            if folder.is_empty() {
                return Ok(None);
            }
            folder = parent_of(folder);
        }
    }

    fn mapped_project(&self, path: &str) -> Option<ProjectRef> {
        self.config
            .path_mappings
            .iter()
            .filter(|m| {
                let prefix = m.prefix.trim_end_matches('/');
                path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|m| m.prefix.len())
            .map(|m| ProjectRef {
                name: m.project.clone(),
                source: ProjectSource::PathMapping,
                read_only: true,
            })
    }

    fn default_project(&self, path: &str) -> Option<ProjectRef> {
        let name = match self.config.default_naming {
            DefaultNaming::None => return None,
            DefaultNaming::Filename => {
                let file = path.rsplit('/').next().unwrap_or(path);
                file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file).to_string()
            }
            DefaultNaming::Foldername => {
                let folder = parent_of(path);
                if folder.is_empty() {
                    return None;
                }
                folder.rsplit('/').next().unwrap_or(folder).to_string()
            }
        };
        Some(ProjectRef {
            name,
            source: ProjectSource::DefaultNaming,
            read_only: true,
        })
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

#[async_trait]
impl ProjectResolver for ConfigProjectResolver {
    async fn get(&self, path: &str) -> Result<ProjectData, SourceError> {
        if let Some(hit) = self.cache.lock().await.get(path) {
            return Ok(hit.clone());
        }
        debug!(%path, "ConfigProjectResolver::get: cache miss");
        let data = self.resolve(path).await?;
        self.cache.lock().await.insert(path.to_string(), data.clone());
        Ok(data)
    }

    async fn clear_cache(&self, paths: Option<&[String]>) {
        let mut cache = self.cache.lock().await;
        match paths {
            Some(paths) => {
                for path in paths {
                    cache.remove(path);
                }
            }
            None => cache.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryDocumentSource;

    async fn resolver(config: ProjectConfig, docs: &[(&str, &str)]) -> ConfigProjectResolver {
        let source = Arc::new(MemoryDocumentSource::new());
        for (path, content) in docs {
            source.insert(*path, *content, 1).await;
        }
        ConfigProjectResolver::new(config, source)
    }

    #[tokio::test]
    async fn test_frontmatter_wins() {
        let r = resolver(ProjectConfig::default(), &[("a.md", "---\nproject: alpha\n---\n")]).await;
        let data = r.get("a.md").await.unwrap();
        let project = data.project.unwrap();
        assert_eq!(project.name, "alpha");
        assert_eq!(project.source, ProjectSource::Metadata);
    }

    #[tokio::test]
    async fn test_config_file_supplies_name_and_metadata() {
        let r = resolver(
            ProjectConfig::default(),
            &[
                ("work/project.md", "---\nproject: launch\narea: ops\n---\n"),
                ("work/sub/notes.md", "- [ ] x\n"),
            ],
        )
        .await;
        let data = r.get("work/sub/notes.md").await.unwrap();
        assert_eq!(data.project.unwrap().name, "launch");
        assert_eq!(data.enhanced_metadata["area"], serde_json::json!("ops"));
        assert!(!data.enhanced_metadata.contains_key("project"));
    }

    #[tokio::test]
    async fn test_longest_path_mapping_and_default_naming() {
        let config = ProjectConfig {
            path_mappings: vec![
                PathMapping {
                    prefix: "work".to_string(),
                    project: "work".to_string(),
                },
                PathMapping {
                    prefix: "work/clients/".to_string(),
                    project: "clients".to_string(),
                },
            ],
            default_naming: DefaultNaming::Filename,
            ..Default::default()
        };
        let r = resolver(config, &[("work/clients/acme.md", ""), ("home/garden.md", "")]).await;

        assert_eq!(r.get("work/clients/acme.md").await.unwrap().project.unwrap().name, "clients");
        let garden = r.get("home/garden.md").await.unwrap().project.unwrap();
        assert_eq!(garden.name, "garden");
        assert_eq!(garden.source, ProjectSource::DefaultNaming);
    }

    #[tokio::test]
    async fn test_cache_and_clear() {
        let r = resolver(ProjectConfig::default(), &[("a.md", ""), ("b.md", "")]).await;
        r.get("a.md").await.unwrap();
        r.get("b.md").await.unwrap();
        assert_eq!(r.cached_len().await, 2);

        r.clear_cache(Some(&["a.md".to_string()])).await;
        assert_eq!(r.cached_len().await, 1);
        r.clear_cache(None).await;
        assert_eq!(r.cached_len().await, 0);
    }
}
