use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::data::migrations;
use crate::error::AppError;

pub const SETTINGS_KEY: &str = "settings";
pub const ALL_SNAPSHOTS_KEY: &str = "allSnapshots";
pub const LAST_SNAPSHOT_KEY: &str = "lastSnapshot";
pub const ORIGINAL_STATE_KEY: &str = "originalState";
const DATA_DIR_ENV: &str = "TIDYMARKS_DATA_DIR";
const DB_FILE: &str = "tidymarks.db";

pub fn meta_key(bookmark_id: &str) -> String {
    format!("meta:{bookmark_id}")
}

/// Simple JSON key-value persistence.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError>;

    /// Writes all entries atomically.
    fn set(&self, entries: &[(&str, serde_json::Value)]) -> Result<(), AppError>;

    fn remove(&self, keys: &[&str]) -> Result<(), AppError>;
}

pub fn get_json<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    kv.get(key)?
        .map(serde_json::from_value)
        .transpose()
        .map_err(AppError::from)
}

pub fn set_json<T: Serialize>(kv: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), AppError> {
    kv.set(&[(key, serde_json::to_value(value)?)])
}

pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens the database under `TIDYMARKS_DATA_DIR`, or the platform data
    /// directory when the variable is unset.
    pub fn open_default() -> Result<Self, AppError> {
        let dir = default_data_dir()?;
        std::fs::create_dir_all(&dir)?;
        Self::open(&dir.join(DB_FILE))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn default_data_dir() -> Result<PathBuf, AppError> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "tidymarks")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| AppError::General("failed to resolve data directory".to_string()))
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        let conn = self.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(AppError::from)
    }

    fn set(&self, entries: &[(&str, serde_json::Value)]) -> Result<(), AppError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, serde_json::to_string(value)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), AppError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips_json() {
        let kv = SqliteKeyValueStore::open_in_memory().unwrap();
        kv.set(&[("a", json!({"x": 1})), ("b", json!([1, 2]))]).unwrap();

        assert_eq!(kv.get("a").unwrap(), Some(json!({"x": 1})));
        assert_eq!(kv.get("b").unwrap(), Some(json!([1, 2])));
        assert_eq!(kv.get("missing").unwrap(), None);
    }

    #[test]
    fn set_overwrites_existing_key() {
        let kv = SqliteKeyValueStore::open_in_memory().unwrap();
        kv.set(&[("k", json!(1))]).unwrap();
        kv.set(&[("k", json!(2))]).unwrap();
        assert_eq!(kv.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn remove_deletes_only_named_keys() {
        let kv = SqliteKeyValueStore::open_in_memory().unwrap();
        kv.set(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]).unwrap();
        kv.remove(&["a", "c", "never-set"]).unwrap();

        assert_eq!(kv.get("a").unwrap(), None);
        assert_eq!(kv.get("b").unwrap(), Some(json!(2)));
        assert_eq!(kv.get("c").unwrap(), None);
    }

    #[test]
    fn typed_helpers_use_serde() {
        let kv = SqliteKeyValueStore::open_in_memory().unwrap();
        set_json(&kv, "list", &vec!["x".to_string()]).unwrap();
        let back: Option<Vec<String>> = get_json(&kv, "list").unwrap();
        assert_eq!(back, Some(vec!["x".to_string()]));

        let wrong: Result<Option<u32>, _> = get_json(&kv, "list");
        assert!(matches!(wrong, Err(AppError::Serde(_))));
    }

    #[test]
    fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let kv = SqliteKeyValueStore::open(&path).unwrap();
            kv.set(&[(ORIGINAL_STATE_KEY, json!({"saved": true}))]).unwrap();
        }
        let kv = SqliteKeyValueStore::open(&path).unwrap();
        assert_eq!(
            kv.get(ORIGINAL_STATE_KEY).unwrap(),
            Some(json!({"saved": true}))
        );
    }

    #[test]
    fn meta_keys_are_prefixed() {
        assert_eq!(meta_key("42"), "meta:42");
    }
}
