//! TaskStore - key-value persistence for the task index
//!
//! The index keeps every cached artifact (raw parse results, augmented tasks,
//! project data, consolidated snapshots, meta values) as a JSON value under a
//! namespaced string key. This crate owns only that contract; namespacing and
//! validation live with the caller.
//!
//! # Backends
//!
//! - [`MemoryStore`] - process-local map, used by tests and ephemeral runs
//! - [`SqliteStore`] - single-table SQLite database, used by the `ti` binary
//!
//! # Example
//!
//! ```ignore
//! use taskstore::{KeyValueStore, SqliteStore};
//!
//! let store = SqliteStore::open("index.db")?;
//! store.put("meta:version", &serde_json::json!("1"))?;
//! let keys = store.keys_with_prefix("meta:")?;
//! ```

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde_json::Value;

/// Synchronous key-value contract shared by every backend
///
/// Implementations must be safe to share across threads; callers running on
/// an async runtime are expected to move calls onto the blocking pool.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Insert or replace the value stored under `key`
    fn put(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Remove `key`, returning whether it existed
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All keys starting with `prefix`, in ascending order
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Remove every key starting with `prefix`, returning how many were removed
    fn delete_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Number of keys starting with `prefix`
    fn count_prefix(&self, prefix: &str) -> StoreResult<usize> {
        Ok(self.keys_with_prefix(prefix)?.len())
    }
}
