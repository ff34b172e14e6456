//! Read-side cache of the last known server state.
//!
//! Each collection is replaced wholesale on a successful fetch, never
//! partially merged; a failed fetch leaves the stored snapshot untouched.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::remote::{Collection, RemoteService};
use crate::store::Store;

/// Store key for the persisted snapshot.
const SNAPSHOT_KEY: &str = "snapshot:v1";

/// Last known server state per collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
  #[serde(default)]
  pub tasks: Vec<Value>,
  #[serde(default)]
  pub notes: Vec<Value>,
  #[serde(default)]
  pub projects: Vec<Value>,
  #[serde(default)]
  pub last_synced: Option<DateTime<Utc>>,
}

/// Durable snapshot reader/refresher.
pub struct SnapshotCache {
  store: Arc<Store>,
}

impl SnapshotCache {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store }
  }

  /// Load the stored snapshot; malformed or missing content is the empty
  /// default, never an error.
  pub fn load(&self) -> Result<Snapshot> {
    Ok(self.store.get(SNAPSHOT_KEY)?.unwrap_or_default())
  }

  /// Replace every collection from the remote service and stamp
  /// `last_synced`. Any fetch failure aborts without touching the store.
  pub async fn refresh(&self, remote: &dyn RemoteService, owner: &str) -> Result<()> {
    let tasks = remote
      .fetch_collection(owner.to_string(), Collection::Tasks)
      .await?;
    let notes = remote
      .fetch_collection(owner.to_string(), Collection::Notes)
      .await?;
    let projects = remote
      .fetch_collection(owner.to_string(), Collection::Projects)
      .await?;

    self.store.put(
      SNAPSHOT_KEY,
      &Snapshot {
        tasks,
        notes,
        projects,
        last_synced: Some(Utc::now()),
      },
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::testing::FakeRemote;
  use serde_json::json;

  #[tokio::test]
  async fn test_refresh_replaces_wholesale() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let cache = SnapshotCache::new(Arc::clone(&store));

    let remote = FakeRemote::new();
    remote.set_collection(Collection::Tasks, vec![json!({"title": "old"})]);
    cache.refresh(&remote, "user@example.com").await.unwrap();

    remote.set_collection(
      Collection::Tasks,
      vec![json!({"title": "a"}), json!({"title": "b"})],
    );
    cache.refresh(&remote, "user@example.com").await.unwrap();

    let snapshot = cache.load().unwrap();
    assert_eq!(snapshot.tasks.len(), 2);
    assert!(snapshot.last_synced.is_some());
  }

  #[tokio::test]
  async fn test_failed_refresh_keeps_previous_snapshot() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let cache = SnapshotCache::new(Arc::clone(&store));

    let remote = FakeRemote::new();
    remote.set_collection(Collection::Tasks, vec![json!({"title": "kept"})]);
    cache.refresh(&remote, "user@example.com").await.unwrap();

    remote.fail_collections(true);
    assert!(cache.refresh(&remote, "user@example.com").await.is_err());

    let snapshot = cache.load().unwrap();
    assert_eq!(snapshot.tasks.len(), 1);
  }

  #[test]
  fn test_missing_snapshot_is_empty_default() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let cache = SnapshotCache::new(store);

    let snapshot = cache.load().unwrap();
    assert!(snapshot.tasks.is_empty());
    assert_eq!(snapshot.last_synced, None);
  }
}
