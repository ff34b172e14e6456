//! Durable FIFO queue of pending mutations.
//!
//! A mutation is durable the instant `enqueue` returns; it leaves the queue
//! only after the remote write provably succeeded. The queue is persisted as
//! one JSON array under a fixed store key, mutated exclusively through the
//! store's atomic whole-blob `update`.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::store::Store;

/// Store key for the persisted queue.
const QUEUE_KEY: &str = "sync:queue";

/// Mutation kind, mirroring the remote subtype schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
  Task,
  Note,
}

impl EntryKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntryKind::Task => "task",
      EntryKind::Note => "note",
    }
  }
}

/// Sync status of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  Pending,
  Syncing,
  Failed,
}

/// One not-yet-confirmed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
  pub id: String,
  pub kind: EntryKind,
  pub title: String,
  /// Kind-specific fields forwarded to the subtype record.
  #[serde(default)]
  pub fields: Map<String, Value>,
  pub created_at: DateTime<Utc>,
  pub status: EntryStatus,
  /// Remote parent id, persisted once phase 1 of the two-phase write
  /// succeeds so a retried entry resumes from phase 2.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
}

/// Ordered, persisted list of pending mutations.
pub struct WriteQueue {
  store: Arc<Store>,
}

impl WriteQueue {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store }
  }

  /// Append a new pending entry. Synchronous, no network; fails only if the
  /// durable store does, in which case the mutation was not saved and the
  /// caller must surface that.
  pub fn enqueue(&self, kind: EntryKind, title: &str, fields: Map<String, Value>) -> Result<QueueEntry> {
    let entry = QueueEntry {
      id: Uuid::new_v4().to_string(),
      kind,
      title: title.to_string(),
      fields,
      created_at: Utc::now(),
      status: EntryStatus::Pending,
      parent_id: None,
    };

    let stored = entry.clone();
    self
      .store
      .update(QUEUE_KEY, move |entries: &mut Vec<QueueEntry>| {
        entries.push(stored);
      })?;

    Ok(entry)
  }

  /// Current pending + syncing + failed count.
  pub fn size(&self) -> Result<usize> {
    let entries: Option<Vec<QueueEntry>> = self.store.get(QUEUE_KEY)?;
    Ok(entries.map(|e| e.len()).unwrap_or(0))
  }

  /// Delete an entry by id. Removing an absent id is a no-op.
  pub fn remove(&self, id: &str) -> Result<()> {
    let id = id.to_string();
    self
      .store
      .update(QUEUE_KEY, move |entries: &mut Vec<QueueEntry>| {
        entries.retain(|e| e.id != id);
      })
  }

  /// Read-only snapshot in insertion order, optionally filtered by kind.
  pub fn list(&self, kind: Option<EntryKind>) -> Result<Vec<QueueEntry>> {
    let entries = self.snapshot()?;
    Ok(match kind {
      Some(k) => entries.into_iter().filter(|e| e.kind == k).collect(),
      None => entries,
    })
  }

  /// Full snapshot in insertion order; the drain pass iterates this while
  /// the persisted queue stays the source of truth.
  pub fn snapshot(&self) -> Result<Vec<QueueEntry>> {
    let entries: Option<Vec<QueueEntry>> = self.store.get(QUEUE_KEY)?;
    Ok(entries.unwrap_or_default())
  }

  pub fn mark_syncing(&self, id: &str) -> Result<()> {
    self.set_status(id, EntryStatus::Syncing)
  }

  pub fn mark_failed(&self, id: &str) -> Result<()> {
    self.set_status(id, EntryStatus::Failed)
  }

  /// Record the remote parent id assigned in phase 1.
  pub fn set_parent(&self, id: &str, parent_id: &str) -> Result<()> {
    let id = id.to_string();
    let parent_id = parent_id.to_string();
    self
      .store
      .update(QUEUE_KEY, move |entries: &mut Vec<QueueEntry>| {
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
          entry.parent_id = Some(parent_id);
        }
      })
  }

  fn set_status(&self, id: &str, status: EntryStatus) -> Result<()> {
    let id = id.to_string();
    self
      .store
      .update(QUEUE_KEY, move |entries: &mut Vec<QueueEntry>| {
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
          entry.status = status;
        }
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn queue() -> WriteQueue {
    WriteQueue::new(Arc::new(Store::open_in_memory().unwrap()))
  }

  fn fields(status: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("status".to_string(), json!(status));
    m
  }

  #[test]
  fn test_enqueue_counts_without_network() {
    let queue = queue();

    for i in 0..4 {
      queue
        .enqueue(EntryKind::Task, &format!("task {}", i), fields("on_deck"))
        .unwrap();
    }

    assert_eq!(queue.size().unwrap(), 4);
  }

  #[test]
  fn test_fifo_order_is_preserved() {
    let queue = queue();
    queue.enqueue(EntryKind::Task, "first", Map::new()).unwrap();
    queue.enqueue(EntryKind::Note, "second", Map::new()).unwrap();
    queue.enqueue(EntryKind::Task, "third", Map::new()).unwrap();

    let titles: Vec<String> = queue
      .snapshot()
      .unwrap()
      .into_iter()
      .map(|e| e.title)
      .collect();
    assert_eq!(titles, vec!["first", "second", "third"]);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let queue = queue();
    let entry = queue.enqueue(EntryKind::Task, "t", Map::new()).unwrap();

    queue.remove(&entry.id).unwrap();
    assert_eq!(queue.size().unwrap(), 0);

    // Absent id is a no-op, not an error.
    queue.remove(&entry.id).unwrap();
    queue.remove("never-existed").unwrap();
  }

  #[test]
  fn test_list_filters_by_kind() {
    let queue = queue();
    queue.enqueue(EntryKind::Task, "t1", Map::new()).unwrap();
    queue.enqueue(EntryKind::Note, "n1", Map::new()).unwrap();
    queue.enqueue(EntryKind::Task, "t2", Map::new()).unwrap();

    let tasks = queue.list(Some(EntryKind::Task)).unwrap();
    assert_eq!(tasks.len(), 2);
    let all = queue.list(None).unwrap();
    assert_eq!(all.len(), 3);
  }

  #[test]
  fn test_status_transitions_persist() {
    let queue = queue();
    let entry = queue.enqueue(EntryKind::Note, "n", Map::new()).unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);

    queue.mark_syncing(&entry.id).unwrap();
    assert_eq!(queue.snapshot().unwrap()[0].status, EntryStatus::Syncing);

    queue.mark_failed(&entry.id).unwrap();
    assert_eq!(queue.snapshot().unwrap()[0].status, EntryStatus::Failed);

    queue.set_parent(&entry.id, "item-9").unwrap();
    assert_eq!(
      queue.snapshot().unwrap()[0].parent_id.as_deref(),
      Some("item-9")
    );
  }
}
