//! In-memory backend

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use crate::{KeyValueStore, StoreError, StoreResult};

/// Process-local store backed by an ordered map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value) -> StoreResult<()> {
        debug!(%key, "MemoryStore::put: called");
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        debug!(%prefix, "MemoryStore::delete_prefix: called");
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}
