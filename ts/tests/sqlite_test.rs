//! Persistence across reopen for the SQLite backend

use serde_json::json;
use taskstore::{KeyValueStore, SqliteStore};
use tempfile::TempDir;

#[test]
fn test_values_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("index.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.put("tasks.raw:notes/a.md", &json!({"data": []})).unwrap();
        store.put("meta:filter:suppressedInline", &json!(["notes/b.md"])).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get("tasks.raw:notes/a.md").unwrap(), Some(json!({"data": []})));
    assert_eq!(store.keys_with_prefix("meta:").unwrap(), vec!["meta:filter:suppressedInline"]);
}

#[test]
fn test_clear_namespace_leaves_others() {
    let temp = TempDir::new().unwrap();
    let store = SqliteStore::open(temp.path().join("index.db")).unwrap();

    for i in 0..5 {
        store.put(&format!("tasks.raw:{i}.md"), &json!(i)).unwrap();
        store.put(&format!("tasks.augmented:{i}.md"), &json!(i)).unwrap();
    }

    assert_eq!(store.delete_prefix("tasks.raw:").unwrap(), 5);
    assert_eq!(store.count_prefix("tasks.raw:").unwrap(), 0);
    assert_eq!(store.count_prefix("tasks.augmented:").unwrap(), 5);
}
