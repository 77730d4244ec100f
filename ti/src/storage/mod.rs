//! Cache/storage layer
//!
//! Wraps a [`taskstore::KeyValueStore`] with the index's namespaces and record
//! envelopes:
//!
//! ```text
//! tasks.raw:{path}        RawRecord        (hash + mtime of the parsed content)
//! tasks.augmented:{path}  AugmentedRecord  (raw hash + augmentation inputs hash)
//! project.data:{path}     ProjectRecord
//! consolidated:{name}     IndexSnapshot
//! meta:{key}              arbitrary JSON (suppressed-path sets, ...)
//! ```
//!
//! Store calls run on the blocking pool. Loads of records written by a
//! different build are evicted and reported as misses.

mod oracle;
mod records;

pub use oracle::RawCacheOracle;
pub use records::{
    AugmentedFingerprint, AugmentedRecord, CACHE_VERSION, CacheRecord, Namespace, ProjectRecord, RawRecord,
    SCHEMA_VERSION, content_hash, is_augmented_valid, is_raw_valid,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use taskstore::{KeyValueStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{ProjectData, Task};
use crate::repository::IndexSnapshot;

/// Name of the consolidated index snapshot
pub const CONSOLIDATED_INDEX: &str = "taskIndex";

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    Join(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Per-namespace record counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub raw: usize,
    pub augmented: usize,
    pub project: usize,
    pub consolidated: usize,
    pub meta: usize,
}

impl StorageStats {
    pub fn total(&self) -> usize {
        self.raw + self.augmented + self.project + self.consolidated + self.meta
    }
}

/// Namespaced, versioned access to the key-value store
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn KeyValueStore>,
}

impl Storage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeyValueStore) -> StorageResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))?
    }

    async fn get_record<T>(&self, key: String) -> StorageResult<Option<CacheRecord<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.blocking(move |store| {
            let Some(value) = store.get(&key)? else {
                return Ok(None);
            };
            let record: CacheRecord<T> = serde_json::from_value(value)?;
            if !record.is_current() {
                debug!(%key, version = %record.version, "Evicting record from another build");
                store.delete(&key)?;
                return Ok(None);
            }
            Ok(Some(record))
        })
        .await
    }

    async fn put_record<T>(&self, key: String, record: &CacheRecord<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        let value = serde_json::to_value(record)?;
        self.blocking(move |store| Ok(store.put(&key, &value)?)).await
    }

    // === Raw ===

    pub async fn load_raw(&self, path: &str) -> StorageResult<Option<RawRecord>> {
        self.get_record(Namespace::Raw.key(path)).await
    }

    /// Store a raw parse result with the fingerprint of the content it came from
    pub async fn store_raw(&self, path: &str, tasks: &[Task], content: &str, mtime: i64) -> StorageResult<RawRecord> {
        debug!(%path, tasks = tasks.len(), mtime, "Storage::store_raw: called");
        let mut record = CacheRecord::new(tasks.to_vec());
        record.hash = Some(content_hash(content));
        record.mtime = Some(mtime);
        self.put_record(Namespace::Raw.key(path), &record).await?;
        Ok(record)
    }

    pub async fn list_raw_paths(&self) -> StorageResult<Vec<String>> {
        self.list_paths(Namespace::Raw).await
    }

    // === Augmented ===

    pub async fn load_augmented(&self, path: &str) -> StorageResult<Option<AugmentedRecord>> {
        self.get_record(Namespace::Augmented.key(path)).await
    }

    pub async fn store_augmented(
        &self,
        path: &str,
        tasks: &[Task],
        fingerprint: AugmentedFingerprint,
    ) -> StorageResult<()> {
        debug!(%path, tasks = tasks.len(), "Storage::store_augmented: called");
        let mut record = CacheRecord::new(tasks.to_vec());
        record.hash = Some(fingerprint.raw_hash.clone());
        record.fingerprint = Some(fingerprint);
        self.put_record(Namespace::Augmented.key(path), &record).await
    }

    pub async fn list_augmented_paths(&self) -> StorageResult<Vec<String>> {
        self.list_paths(Namespace::Augmented).await
    }

    // === Project ===

    pub async fn load_project(&self, path: &str) -> StorageResult<Option<ProjectRecord>> {
        self.get_record(Namespace::Project.key(path)).await
    }

    /// Project data has its own lifecycle: it can change while the file does not
    pub async fn store_project(&self, path: &str, data: &ProjectData) -> StorageResult<()> {
        let mut record = CacheRecord::new(data.clone());
        record.hash = Some(content_hash(&serde_json::to_string(data)?));
        self.put_record(Namespace::Project.key(path), &record).await
    }

    // === Consolidated ===

    pub async fn load_consolidated(&self) -> StorageResult<Option<IndexSnapshot>> {
        let record: Option<CacheRecord<IndexSnapshot>> =
            self.get_record(Namespace::Consolidated.key(CONSOLIDATED_INDEX)).await?;
        Ok(record.map(|r| r.data))
    }

    pub async fn store_consolidated(&self, snapshot: &IndexSnapshot) -> StorageResult<()> {
        debug!(files = snapshot.files.len(), "Storage::store_consolidated: called");
        let record = CacheRecord::new(snapshot);
        self.put_record(Namespace::Consolidated.key(CONSOLIDATED_INDEX), &record)
            .await
    }

    // === Meta ===

    pub async fn load_meta<T>(&self, key: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = Namespace::Meta.key(key);
        let value = self.blocking(move |store| Ok(store.get(&key)?)).await?;
        Ok(value.map(serde_json::from_value).transpose()?)
    }

    pub async fn save_meta<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let key = Namespace::Meta.key(key);
        let value = serde_json::to_value(value)?;
        self.blocking(move |store| Ok(store.put(&key, &value)?)).await
    }

    // === Maintenance ===

    pub async fn clear_namespace(&self, namespace: Namespace) -> StorageResult<usize> {
        let removed = self
            .blocking(move |store| Ok(store.delete_prefix(namespace.prefix())?))
            .await?;
        info!(%namespace, removed, "Cleared storage namespace");
        Ok(removed)
    }

    /// Drop every per-file record for `path`
    pub async fn clear_file(&self, path: &str) -> StorageResult<()> {
        debug!(%path, "Storage::clear_file: called");
        let keys = [Namespace::Raw, Namespace::Augmented, Namespace::Project].map(|ns| ns.key(path));
        self.blocking(move |store| {
            for key in &keys {
                store.delete(key)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn clear(&self) -> StorageResult<()> {
        for namespace in Namespace::all() {
            self.clear_namespace(namespace).await?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> StorageResult<StorageStats> {
        self.blocking(|store| {
            let mut counts = BTreeMap::new();
            for namespace in Namespace::all() {
                counts.insert(namespace.prefix(), store.count_prefix(namespace.prefix())?);
            }
            let count = |ns: Namespace| counts.get(ns.prefix()).copied().unwrap_or(0);
            Ok(StorageStats {
                raw: count(Namespace::Raw),
                augmented: count(Namespace::Augmented),
                project: count(Namespace::Project),
                consolidated: count(Namespace::Consolidated),
                meta: count(Namespace::Meta),
            })
        })
        .await
    }

    async fn list_paths(&self, namespace: Namespace) -> StorageResult<Vec<String>> {
        let keys = self
            .blocking(move |store| Ok(store.keys_with_prefix(namespace.prefix())?))
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(namespace.prefix()).map(str::to_string))
            .collect())
    }

    /// Best-effort write: failures are logged and swallowed
    pub async fn save_meta_logged<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.save_meta(key, value).await {
            warn!(%key, error = %e, "Failed to persist meta value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskstore::MemoryStore;

    fn storage() -> (Storage, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Storage::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_raw_roundtrip_carries_fingerprint() {
        let (storage, _) = storage();
        let tasks = vec![Task::new("a-L0", "a.md", 0, "one")];
        storage.store_raw("a.md", &tasks, "- [ ] one", 42).await.unwrap();

        let record = storage.load_raw("a.md").await.unwrap().unwrap();
        assert_eq!(record.data, tasks);
        assert_eq!(record.mtime, Some(42));
        assert!(is_raw_valid(&record, "- [ ] one", 42));
        assert!(!is_raw_valid(&record, "- [ ] one!", 42));
    }

    #[tokio::test]
    async fn test_version_mismatch_evicts() {
        let (storage, store) = storage();
        let mut record: RawRecord = CacheRecord::new(Vec::new());
        record.version = "0.0.0-old".to_string();
        store
            .put(&Namespace::Raw.key("a.md"), &serde_json::to_value(&record).unwrap())
            .unwrap();

        assert!(storage.load_raw("a.md").await.unwrap().is_none());
        assert!(store.get(&Namespace::Raw.key("a.md")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_file_and_namespace() {
        let (storage, _) = storage();
        let fp = AugmentedFingerprint {
            raw_hash: "h".to_string(),
            inputs_hash: "i".to_string(),
        };
        for path in ["a.md", "b.md"] {
            storage.store_raw(path, &[], "", 1).await.unwrap();
            storage.store_augmented(path, &[], fp.clone()).await.unwrap();
            storage.store_project(path, &ProjectData::default()).await.unwrap();
        }
        storage.save_meta("k", &vec!["x"]).await.unwrap();

        storage.clear_file("a.md").await.unwrap();
        assert_eq!(storage.list_raw_paths().await.unwrap(), vec!["b.md"]);
        assert_eq!(storage.list_augmented_paths().await.unwrap(), vec!["b.md"]);

        storage.clear_namespace(Namespace::Augmented).await.unwrap();
        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.raw, 1);
        assert_eq!(stats.augmented, 0);
        assert_eq!(stats.project, 1);
        assert_eq!(stats.meta, 1);

        let meta: Vec<String> = storage.load_meta("k").await.unwrap().unwrap();
        assert_eq!(meta, vec!["x"]);
    }

    #[tokio::test]
    async fn test_consolidated_roundtrip() {
        let (storage, _) = storage();
        assert!(storage.load_consolidated().await.unwrap().is_none());

        let mut snapshot = IndexSnapshot::default();
        snapshot
            .files
            .insert("a.md".to_string(), vec![Task::new("a-L0", "a.md", 0, "one")]);
        storage.store_consolidated(&snapshot).await.unwrap();

        let loaded = storage.load_consolidated().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }
}
