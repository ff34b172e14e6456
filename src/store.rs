//! Durable key-value store backed by SQLite.
//!
//! Values are JSON blobs under namespaced string keys (e.g. `sync:queue`,
//! `snapshot:v1`). Every mutation replaces the whole blob; `update` performs
//! the read-modify-write while holding the connection lock, which is the only
//! coordination the two engine halves need between each other.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-backed durable store for JSON-serializable blobs.
pub struct Store {
  conn: Mutex<Connection>,
}

impl Store {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory store (tests and --drain-once dry runs).
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default store path under the platform data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("ondeck-sync").join("store.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }

  /// Read the value under `key`.
  ///
  /// Malformed persisted content is treated as absent (warn-logged), so
  /// storage-format drift across versions never turns into a hard error.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Self::read_locked(&conn, key)
  }

  /// Write `value` under `key`, replacing any previous blob.
  pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Self::write_locked(&conn, key, value)
  }

  /// Atomically read, modify, and write back the blob under `key`.
  ///
  /// A missing or malformed blob starts from `T::default()`. The closure's
  /// return value is passed through.
  pub fn update<T, R, F>(&self, key: &str, f: F) -> Result<R>
  where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T) -> R,
  {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut value: T = Self::read_locked(&conn, key)?.unwrap_or_default();
    let out = f(&mut value);
    Self::write_locked(&conn, key, &value)?;

    Ok(out)
  }

  /// Delete the blob under `key`. Returns whether a row existed.
  pub fn remove(&self, key: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let changed = conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete key {}: {}", key, e))?;

    Ok(changed > 0)
  }

  fn read_locked<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read key {}: {}", key, e))?;

    match data {
      Some(bytes) => match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
          warn!(key, error = %e, "discarding malformed stored blob");
          Ok(None)
        }
      },
      None => Ok(None),
    }
  }

  fn write_locked<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let data =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, data, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, data],
      )
      .map_err(|e| eyre!("Failed to write key {}: {}", key, e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
  struct Counter {
    value: u32,
  }

  #[test]
  fn test_put_get_roundtrip() {
    let store = Store::open_in_memory().unwrap();
    store.put("test:counter", &Counter { value: 7 }).unwrap();

    let got: Option<Counter> = store.get("test:counter").unwrap();
    assert_eq!(got, Some(Counter { value: 7 }));
  }

  #[test]
  fn test_get_missing_key_is_none() {
    let store = Store::open_in_memory().unwrap();
    let got: Option<Counter> = store.get("absent").unwrap();
    assert_eq!(got, None);
  }

  #[test]
  fn test_update_starts_from_default() {
    let store = Store::open_in_memory().unwrap();

    let out = store
      .update("test:counter", |c: &mut Counter| {
        c.value += 1;
        c.value
      })
      .unwrap();

    assert_eq!(out, 1);
    let got: Option<Counter> = store.get("test:counter").unwrap();
    assert_eq!(got, Some(Counter { value: 1 }));
  }

  #[test]
  fn test_malformed_blob_reads_as_absent() {
    let store = Store::open_in_memory().unwrap();
    store.put("test:counter", &"not a counter").unwrap();

    let got: Option<Counter> = store.get("test:counter").unwrap();
    assert_eq!(got, None);

    // update recovers via the default
    let out = store
      .update("test:counter", |c: &mut Counter| {
        c.value += 2;
        c.value
      })
      .unwrap();
    assert_eq!(out, 2);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    store.put("k", &Counter { value: 1 }).unwrap();

    assert!(store.remove("k").unwrap());
    assert!(!store.remove("k").unwrap());
  }
}
