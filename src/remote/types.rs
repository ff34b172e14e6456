use serde::Deserialize;

/// Read-side collections mirrored into the offline snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
  Tasks,
  Notes,
  Projects,
}

impl Collection {
  /// Path segment under the service base URL.
  pub fn path(&self) -> &'static str {
    match self {
      Collection::Tasks => "tasks",
      Collection::Notes => "notes",
      Collection::Projects => "projects",
    }
  }
}

/// Wire shape of a freshly created parent record.
#[derive(Debug, Deserialize)]
pub struct CreatedItem {
  pub id: String,
}
