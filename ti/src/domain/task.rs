//! Task records extracted from documents

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::project::ProjectRef;

/// One extracted work item
///
/// Owned by the repository and replaced wholesale whenever its file is
/// re-parsed. `id` is unique across the whole index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub file_path: String,
    /// Zero-based line number inside the owning file
    pub line: usize,
    pub completed: bool,
    /// Raw status marker (for example `" "`, `"x"`, `"/"`)
    pub status: String,
    /// Task text with markup removed
    pub content: String,
    pub original_markdown: String,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl Task {
    /// Create an open task with empty metadata
    pub fn new(id: impl Into<String>, file_path: impl Into<String>, line: usize, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            file_path: file_path.into(),
            line,
            completed: false,
            status: " ".to_string(),
            original_markdown: format!("- [ ] {}", content),
            content,
            metadata: TaskMetadata::default(),
        }
    }
}

/// Structured task metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub project_ref: Option<ProjectRef>,
    pub context: Option<String>,
    pub area: Option<String>,
    /// 1 (lowest) to 5 (highest)
    pub priority: Option<u8>,
    pub due_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub scheduled_date: Option<NaiveDate>,
    pub completed_date: Option<NaiveDate>,
    pub recurrence: Option<String>,
    pub depends_on: Vec<String>,
    /// Heading path the task sits under
    pub heading: Vec<String>,
    pub time: Option<TimeComponents>,
    /// Set for tasks synthesized from file metadata rather than inline markup
    pub file_level: bool,
}

/// Time-of-day components attached to a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeComponents {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}
