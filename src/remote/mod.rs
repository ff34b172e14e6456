//! Remote data service boundary.
//!
//! The service follows a two-step write contract: a generic parent record
//! ("item") is created first, then a kind-specific subtype record referencing
//! it. Both calls lack a dedupe key, so delivery is at-least-once; the sync
//! coordinator narrows the duplicate-parent window by persisting the assigned
//! parent id between the two phases.

pub mod client;
pub mod types;

use color_eyre::Result;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::queue::EntryKind;

pub use client::HttpRemote;
pub use types::Collection;

/// The remote table store consumed by the sync coordinator.
pub trait RemoteService: Send + Sync {
  /// Phase 1: create the generic parent record; returns its assigned id.
  fn create_item(
    &self,
    title: String,
    owner: String,
    kind: EntryKind,
  ) -> BoxFuture<'_, Result<String>>;

  /// Phase 2: create the kind-specific subtype record for an existing item.
  fn create_detail(
    &self,
    item_id: String,
    kind: EntryKind,
    fields: Map<String, Value>,
  ) -> BoxFuture<'_, Result<()>>;

  /// Fetch a whole collection for the snapshot cache.
  fn fetch_collection(
    &self,
    owner: String,
    collection: Collection,
  ) -> BoxFuture<'_, Result<Vec<Value>>>;
}
