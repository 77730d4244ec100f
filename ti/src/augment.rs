//! Augmentor - merges raw tasks with file frontmatter and project data
//!
//! Resolution order for scalar fields is task, then file frontmatter, then
//! project metadata. Arrays merge task-first without duplicates. Dates are
//! inherited only when the task has none; recurrence is never inherited.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{Frontmatter, ProjectData, ProjectRef, ProjectSource, Task, TaskMetadata};
use crate::storage::content_hash;

/// Augmentor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Inherit frontmatter fields into each task
    #[serde(default = "default_file_metadata_inheritance")]
    pub file_metadata_inheritance: bool,
}

fn default_file_metadata_inheritance() -> bool {
    true
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            file_metadata_inheritance: default_file_metadata_inheritance(),
        }
    }
}

/// Inputs the augmentor merges into a file's raw tasks
#[derive(Debug, Clone, Copy)]
pub struct AugmentContext<'a> {
    pub file_path: &'a str,
    pub frontmatter: &'a Frontmatter,
    pub project: &'a ProjectData,
}

#[derive(Debug, Clone, Default)]
pub struct Augmentor {
    config: AugmentConfig,
}

impl Augmentor {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Hash of everything besides the raw tasks that shapes the merged output
    pub fn inputs_hash(&self, frontmatter: &Frontmatter, project: &ProjectData) -> String {
        let inputs = (frontmatter, project, &self.config);
        content_hash(&serde_json::to_string(&inputs).unwrap_or_default())
    }

    /// Merge `raw` tasks with the file's frontmatter and project data
    pub fn merge(&self, ctx: AugmentContext<'_>, raw: &[Task]) -> Vec<Task> {
        debug!(path = %ctx.file_path, tasks = raw.len(), "Augmentor::merge: called");
        let empty = Frontmatter::new();
        let frontmatter = if self.config.file_metadata_inheritance {
            ctx.frontmatter
        } else {
            &empty
        };
        let enhanced = &ctx.project.enhanced_metadata;
        let project_ref = resolve_project_ref(ctx.project, ctx.frontmatter);

        raw.iter()
            .map(|task| {
                let mut task = task.clone();
                merge_metadata(&mut task.metadata, frontmatter, enhanced, project_ref.as_ref());
                task
            })
            .collect()
    }
}

fn merge_metadata(meta: &mut TaskMetadata, frontmatter: &Frontmatter, enhanced: &Frontmatter, project_ref: Option<&ProjectRef>) {
    let layers = [frontmatter, enhanced];

    if meta.context.is_none() {
        meta.context = layers.iter().find_map(|l| string_field(l, &["context"]));
    }
    if meta.area.is_none() {
        meta.area = layers.iter().find_map(|l| string_field(l, &["area"]));
    }
    if meta.priority.is_none() {
        meta.priority = layers.iter().find_map(|l| l.get("priority").and_then(priority_value));
    }

    for layer in layers {
        extend_unique(&mut meta.tags, list_field(layer, &["tags"]).into_iter().map(normalize_tag));
        extend_unique(&mut meta.depends_on, list_field(layer, &["dependsOn", "depends_on"]));
    }

    if meta.due_date.is_none() {
        meta.due_date = layers.iter().find_map(|l| date_field(l, &["due", "dueDate"]));
    }
    if meta.start_date.is_none() {
        meta.start_date = layers.iter().find_map(|l| date_field(l, &["start", "startDate"]));
    }
    if meta.scheduled_date.is_none() {
        meta.scheduled_date = layers.iter().find_map(|l| date_field(l, &["scheduled", "scheduledDate"]));
    }

    if meta.project_ref.is_none() {
        meta.project_ref = project_ref.cloned();
    }
    if meta.project.is_none() {
        meta.project = meta.project_ref.as_ref().map(|p| p.name.clone());
    }
}

/// Resolver project, then project metadata, then the file's own frontmatter
fn resolve_project_ref(project: &ProjectData, frontmatter: &Frontmatter) -> Option<ProjectRef> {
    if let Some(resolved) = &project.project {
        return Some(resolved.clone());
    }
    if let Some(name) = string_field(&project.enhanced_metadata, &["project"]) {
        return Some(ProjectRef {
            name,
            source: ProjectSource::ConfigFile,
            read_only: true,
        });
    }
    string_field(frontmatter, &["project"]).map(|name| ProjectRef {
        name,
        source: ProjectSource::Metadata,
        read_only: false,
    })
}

fn string_field(map: &Frontmatter, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Accepts a YAML list or a comma/space separated string
fn list_field(map: &Frontmatter, keys: &[&str]) -> Vec<String> {
    let Some(value) = keys.iter().find_map(|k| map.get(*k)) else {
        return Vec::new();
    };
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split([',', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn date_field(map: &Frontmatter, keys: &[&str]) -> Option<NaiveDate> {
    let raw = string_field(map, keys)?;
    // Tolerate full timestamps by taking the date part
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Numeric 1-5 or a priority word
fn priority_value(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().filter(|n| (1..=5).contains(n)).map(|n| n as u8),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "highest" => Some(5),
            "high" => Some(4),
            "medium" | "normal" => Some(3),
            "low" => Some(2),
            "lowest" => Some(1),
            other => other.parse().ok().filter(|n| (1..=5).contains(n)),
        },
        _ => None,
    }
}

fn normalize_tag(tag: String) -> String {
    if tag.starts_with('#') { tag } else { format!("#{}", tag) }
}

fn extend_unique(target: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
