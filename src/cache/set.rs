//! Named, versioned response caches.
//!
//! Each cache role (static, dynamic, pages, images) holds request→response
//! pairs and is versioned as a unit: the full cache name is
//! `<role>-cache-v<N>`. The activate phase deletes every name outside the
//! current valid set, so at most one cache per role is ever live.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use crate::fetch::{FetchRequest, FetchResponse};

/// The four cache roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRole {
  Static,
  Dynamic,
  Pages,
  Images,
}

impl CacheRole {
  pub const ALL: [CacheRole; 4] = [
    CacheRole::Static,
    CacheRole::Dynamic,
    CacheRole::Pages,
    CacheRole::Images,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      CacheRole::Static => "static",
      CacheRole::Dynamic => "dynamic",
      CacheRole::Pages => "pages",
      CacheRole::Images => "images",
    }
  }
}

/// Computes versioned cache names and the currently-valid set.
#[derive(Debug, Clone, Copy)]
pub struct CacheNames {
  version: u32,
}

impl CacheNames {
  pub fn new(version: u32) -> Self {
    Self { version }
  }

  /// Full name for a role at the current version.
  pub fn name(&self, role: CacheRole) -> String {
    format!("{}-cache-v{}", role.as_str(), self.version)
  }

  /// All names valid at the current version.
  pub fn valid_set(&self) -> Vec<String> {
    CacheRole::ALL.iter().map(|r| self.name(*r)).collect()
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    cache_name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_name ON cache_entries(cache_name);
"#;

/// SQLite-backed set of named response caches.
pub struct CacheSet {
  conn: Mutex<Connection>,
}

impl CacheSet {
  /// Open or create the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let set = Self {
      conn: Mutex::new(conn),
    };
    set.run_migrations()?;

    Ok(set)
  }

  /// Open an in-memory cache set (tests).
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    let set = Self {
      conn: Mutex::new(conn),
    };
    set.run_migrations()?;

    Ok(set)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// Register a cache by name. Idempotent.
  pub fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO caches (cache_name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  /// All existing cache names, including empty ones.
  pub fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT cache_name FROM caches ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare cache name query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query cache names: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  /// Delete a cache and all its entries. Returns whether the cache existed.
  pub fn delete_cache(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = conn
      .execute("DELETE FROM caches WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    Ok(removed > 0)
  }

  /// Store a response snapshot under the request's key.
  ///
  /// Only GET requests are ever cached; anything else is rejected.
  pub fn put(&self, name: &str, req: &FetchRequest, resp: &FetchResponse) -> Result<()> {
    if !req.is_get() {
      return Err(eyre!("Refusing to cache non-GET request {}", req.url));
    }

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_vec(&resp.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO caches (cache_name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to register cache {}: {}", name, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, entry_key, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          name,
          entry_key(req),
          req.url.as_str(),
          resp.status,
          headers,
          resp.body
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry for {}: {}", req.url, e))?;

    Ok(())
  }

  /// Look up a stored response by exact request match.
  pub fn lookup(&self, name: &str, req: &FetchRequest) -> Result<Option<FetchResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM cache_entries
         WHERE cache_name = ? AND entry_key = ?",
        params![name, entry_key(req)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache entry for {}: {}", req.url, e))?;

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;
        Ok(Some(FetchResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }
}

/// Stable fixed-length row key for a request.
fn entry_key(req: &FetchRequest) -> String {
  let mut hasher = Sha256::new();
  hasher.update(req.method.as_bytes());
  hasher.update(b":");
  hasher.update(req.url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(url: &str) -> FetchRequest {
    FetchRequest::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_versioned_names() {
    let names = CacheNames::new(3);
    assert_eq!(names.name(CacheRole::Pages), "pages-cache-v3");
    assert_eq!(names.valid_set().len(), 4);
  }

  #[test]
  fn test_put_and_lookup() {
    let set = CacheSet::open_in_memory().unwrap();
    let req = get("https://ondeck.app/app.js");
    let resp = FetchResponse::ok("text/javascript", b"console.log(1)".to_vec());

    set.put("dynamic-cache-v1", &req, &resp).unwrap();
    let got = set.lookup("dynamic-cache-v1", &req).unwrap();
    assert_eq!(got, Some(resp));
  }

  #[test]
  fn test_lookup_misses_other_cache() {
    let set = CacheSet::open_in_memory().unwrap();
    let req = get("https://ondeck.app/app.js");
    let resp = FetchResponse::ok("text/javascript", Vec::new());

    set.put("dynamic-cache-v1", &req, &resp).unwrap();
    assert!(set.lookup("dynamic-cache-v2", &req).unwrap().is_none());
  }

  #[test]
  fn test_non_get_is_rejected() {
    let set = CacheSet::open_in_memory().unwrap();
    let mut req = get("https://ondeck.app/items");
    req.method = "POST".to_string();

    let resp = FetchResponse::ok("application/json", Vec::new());
    assert!(set.put("dynamic-cache-v1", &req, &resp).is_err());
  }

  #[test]
  fn test_delete_cache_removes_entries_and_name() {
    let set = CacheSet::open_in_memory().unwrap();
    let req = get("https://ondeck.app/style.css");
    set.open_cache("static-cache-v1").unwrap();
    set
      .put("static-cache-v1", &req, &FetchResponse::ok("text/css", Vec::new()))
      .unwrap();

    assert!(set.delete_cache("static-cache-v1").unwrap());
    assert!(set.cache_names().unwrap().is_empty());
    assert!(set.lookup("static-cache-v1", &req).unwrap().is_none());
    assert!(!set.delete_cache("static-cache-v1").unwrap());
  }

  #[test]
  fn test_empty_cache_is_enumerable() {
    let set = CacheSet::open_in_memory().unwrap();
    set.open_cache("images-cache-v2").unwrap();
    assert_eq!(set.cache_names().unwrap(), vec!["images-cache-v2"]);
  }
}
