//! Paths excluded by the active inclusion filter

use std::collections::BTreeSet;

use tracing::debug;

use crate::storage::Storage;

pub const SUPPRESSED_INLINE_KEY: &str = "filter:suppressedInline";
pub const SUPPRESSED_FILE_TASKS_KEY: &str = "filter:suppressedFileTasks";

/// Inline and file-task paths currently held back by the filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuppressedPaths {
    pub inline: BTreeSet<String>,
    pub file: BTreeSet<String>,
}

impl SuppressedPaths {
    /// Load both sets; unreadable entries start empty
    pub async fn load(storage: &Storage) -> Self {
        let inline = storage
            .load_meta::<BTreeSet<String>>(SUPPRESSED_INLINE_KEY)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let file = storage
            .load_meta::<BTreeSet<String>>(SUPPRESSED_FILE_TASKS_KEY)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        debug!(inline = inline.len(), file = file.len(), "SuppressedPaths::load: loaded");
        Self { inline, file }
    }

    /// Best-effort write of both sets
    pub async fn save(&self, storage: &Storage) {
        storage.save_meta_logged(SUPPRESSED_INLINE_KEY, &self.inline).await;
        storage.save_meta_logged(SUPPRESSED_FILE_TASKS_KEY, &self.file).await;
    }

    pub fn is_empty(&self) -> bool {
        self.inline.is_empty() && self.file.is_empty()
    }

    pub fn rename(&mut self, old: &str, new: &str) {
        if self.inline.remove(old) {
            self.inline.insert(new.to_string());
        }
        if self.file.remove(old) {
            self.file.insert(new.to_string());
        }
    }

    pub fn forget(&mut self, path: &str) -> bool {
        let inline = self.inline.remove(path);
        let file = self.file.remove(path);
        inline || file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taskstore::MemoryStore;

    #[tokio::test]
    async fn test_roundtrip_through_meta_store() {
        let storage = Storage::new(Arc::new(MemoryStore::new()));
        assert!(SuppressedPaths::load(&storage).await.is_empty());

        let mut sets = SuppressedPaths::default();
        sets.inline.insert("a.md".into());
        sets.file.insert("b.md".into());
        sets.save(&storage).await;

        let loaded = SuppressedPaths::load(&storage).await;
        assert_eq!(loaded, sets);
    }

    #[test]
    fn test_rename_and_forget() {
        let mut sets = SuppressedPaths::default();
        sets.inline.insert("old.md".into());
        sets.rename("old.md", "new.md");
        assert!(sets.inline.contains("new.md"));
        assert!(sets.forget("new.md"));
        assert!(!sets.forget("new.md"));
    }
}
