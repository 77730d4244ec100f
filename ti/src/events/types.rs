//! Event types exchanged between the indexing core and its host
//!
//! Inbound events come from the host (file watcher, editors, calendar sync);
//! outbound events announce index changes. Both travel on the same bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Task;

/// Why a file-changed event was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeReason {
    Create,
    Modify,
    Rename,
    Frontmatter,
    Delete,
    Error,
    Restore,
}

/// Settings area whose change invalidates cached state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsScope {
    Parser,
    Augment,
    Project,
    Index,
}

/// The vocabulary of index activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IndexEvent {
    // === Inbound ===
    /// A document changed on disk (also emitted outbound for errors and restores)
    FileChanged {
        path: String,
        reason: FileChangeReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A single task was edited in place
    TaskUpdated { task: Task },
    /// Tasks were deleted from a file
    TaskDeleted {
        task_id: String,
        file_path: String,
        deleted_task_ids: Vec<String>,
        mode: String,
    },
    /// A file-level task was created or changed
    FileTaskUpdated { task: Task },
    /// A file-level task was removed
    FileTaskRemoved { file_path: String },
    /// The calendar source published a new event set
    CalendarEventsUpdated { events: Vec<serde_json::Value>, seq: u64 },
    /// A write to a document finished
    WriteOperationComplete {
        path: String,
        #[serde(default)]
        task_id: Option<String>,
    },

    // === Inbound and outbound ===
    /// The index changed for the listed files
    IndexBatchUpdated {
        changed_files: Vec<String>,
        #[serde(default)]
        source_seq: Option<u64>,
        seq: u64,
        total_tasks: usize,
    },

    // === Outbound ===
    /// The index is populated and queryable
    CacheReady {
        initial: bool,
        timestamp: DateTime<Utc>,
        seq: u64,
    },
    /// Cached state was invalidated for the given settings scopes
    SettingsChanged {
        scopes: Vec<SettingsScope>,
        timestamp: DateTime<Utc>,
    },
}

impl IndexEvent {
    /// Variant name, used in logs
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FileChanged { .. } => "FileChanged",
            Self::TaskUpdated { .. } => "TaskUpdated",
            Self::TaskDeleted { .. } => "TaskDeleted",
            Self::FileTaskUpdated { .. } => "FileTaskUpdated",
            Self::FileTaskRemoved { .. } => "FileTaskRemoved",
            Self::CalendarEventsUpdated { .. } => "CalendarEventsUpdated",
            Self::WriteOperationComplete { .. } => "WriteOperationComplete",
            Self::IndexBatchUpdated { .. } => "IndexBatchUpdated",
            Self::CacheReady { .. } => "CacheReady",
            Self::SettingsChanged { .. } => "SettingsChanged",
        }
    }

    pub fn file_changed(path: impl Into<String>, reason: FileChangeReason) -> Self {
        Self::FileChanged {
            path: path.into(),
            reason,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_tag() {
        let event = IndexEvent::file_changed("notes/a.md", FileChangeReason::Modify);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "FileChanged");
        assert_eq!(json["reason"], "modify");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_index_batch_without_source_seq() {
        let json = r#"{"type":"IndexBatchUpdated","changed_files":["a.md"],"seq":3,"total_tasks":1}"#;
        let event: IndexEvent = serde_json::from_str(json).unwrap();
        match event {
            IndexEvent::IndexBatchUpdated { source_seq, seq, .. } => {
                assert_eq!(source_seq, None);
                assert_eq!(seq, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
