//! SQLite backend

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::{KeyValueStore, StoreError, StoreResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

/// Single-table SQLite store
///
/// Values are stored as JSON text. The connection is guarded by a mutex so the
/// store can be shared behind an `Arc` and driven from blocking tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file, creating parent directories as needed
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SqliteStore::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened task store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.with_conn(|conn| {
            let text: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                .optional()?;
            match text {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        })
    }

    fn put(&self, key: &str, value: &Value) -> StoreResult<()> {
        debug!(%key, "SqliteStore::put: called");
        let text = serde_json::to_string(value)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, text],
            )?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM kv WHERE key = ?1", params![key])? > 0))
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }

    fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        debug!(%prefix, "SqliteStore::delete_prefix: called");
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM kv WHERE substr(key, 1, length(?1)) = ?1", params![prefix])?)
        })
    }

    fn count_prefix(&self, prefix: &str) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kv WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_replaces_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("k", &json!(1)).unwrap();
        store.put("k", &json!({"v": 2})).unwrap();

        assert_eq!(store.get("k").unwrap(), Some(json!({"v": 2})));
        assert_eq!(store.count_prefix("").unwrap(), 1);
    }

    #[test]
    fn test_prefix_does_not_treat_underscore_as_wildcard() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("a_b:1", &json!(1)).unwrap();
        store.put("axb:1", &json!(2)).unwrap();

        assert_eq!(store.keys_with_prefix("a_b:").unwrap(), vec!["a_b:1"]);
        assert_eq!(store.delete_prefix("a_b:").unwrap(), 1);
        assert_eq!(store.get("axb:1").unwrap(), Some(json!(2)));
    }
}
