//! Drains the write queue against the remote service.
//!
//! One drain cycle is `idle → draining → idle`; a single atomic flag gives
//! mutual exclusion, and a second trigger while draining is a no-op (the next
//! online event or poll tick picks up remaining work). Failures are isolated
//! per entry: a bad entry is marked failed and left queued while the pass
//! continues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::EngineEvent;
use crate::queue::{QueueEntry, WriteQueue};
use crate::remote::RemoteService;

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub synced: usize,
  pub failed: usize,
  /// True when another drain was already in progress and this one did nothing.
  pub skipped: bool,
}

impl DrainReport {
  fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Coordinates two-phase remote writes for queued mutations.
pub struct SyncCoordinator {
  queue: Arc<WriteQueue>,
  remote: Arc<dyn RemoteService>,
  owner: String,
  events: mpsc::UnboundedSender<EngineEvent>,
  draining: AtomicBool,
  last_error: Mutex<Option<String>>,
}

impl SyncCoordinator {
  pub fn new(
    queue: Arc<WriteQueue>,
    remote: Arc<dyn RemoteService>,
    owner: String,
    events: mpsc::UnboundedSender<EngineEvent>,
  ) -> Self {
    Self {
      queue,
      remote,
      owner,
      events,
      draining: AtomicBool::new(false),
      last_error: Mutex::new(None),
    }
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::SeqCst)
  }

  /// Message of the most recent drain-level failure, if any.
  pub fn last_error(&self) -> Option<String> {
    self.last_error.lock().ok().and_then(|e| e.clone())
  }

  /// Run one drain cycle over all currently-queued entries.
  ///
  /// Runs to completion; there is no cancellation. Any error outside the
  /// per-entry handling is recorded as `last_error` and ends the cycle
  /// cleanly so the next trigger retries from current state.
  pub async fn drain(&self) -> DrainReport {
    if self.draining.swap(true, Ordering::SeqCst) {
      debug!("drain already in progress, skipping");
      return DrainReport::skipped();
    }

    let report = match self.drain_inner().await {
      Ok(report) => {
        if let Ok(mut last) = self.last_error.lock() {
          *last = None;
        }
        report
      }
      Err(e) => {
        warn!(error = %e, "drain aborted");
        if let Ok(mut last) = self.last_error.lock() {
          *last = Some(e.to_string());
        }
        DrainReport::default()
      }
    };

    self.draining.store(false, Ordering::SeqCst);

    if report.synced + report.failed > 0 {
      let _ = self.events.send(EngineEvent::SyncFinished {
        synced: report.synced,
        failed: report.failed,
      });
    }

    report
  }

  async fn drain_inner(&self) -> Result<DrainReport> {
    let entries = self.queue.snapshot()?;
    if entries.is_empty() {
      return Ok(DrainReport::default());
    }

    let _ = self.events.send(EngineEvent::SyncStarted);
    debug!(entries = entries.len(), "drain started");

    let mut report = DrainReport::default();
    for entry in entries {
      match self.sync_entry(&entry).await {
        Ok(()) => {
          self.queue.remove(&entry.id)?;
          report.synced += 1;
        }
        Err(e) => {
          warn!(id = %entry.id, title = %entry.title, error = %e, "entry sync failed");
          self.queue.mark_failed(&entry.id)?;
          report.failed += 1;
        }
      }
    }

    debug!(synced = report.synced, failed = report.failed, "drain finished");
    Ok(report)
  }

  /// Two-phase write for a single entry.
  ///
  /// The parent id from phase 1 is persisted before phase 2 is attempted, so
  /// a retried entry resumes from phase 2 instead of creating a second
  /// parent record.
  async fn sync_entry(&self, entry: &QueueEntry) -> Result<()> {
    self.queue.mark_syncing(&entry.id)?;

    let parent_id = match &entry.parent_id {
      Some(id) => id.clone(),
      None => {
        let id = self
          .remote
          .create_item(entry.title.clone(), self.owner.clone(), entry.kind)
          .await?;
        self.queue.set_parent(&entry.id, &id)?;
        id
      }
    };

    self
      .remote
      .create_detail(parent_id, entry.kind, entry.fields.clone())
      .await?;

    Ok(())
  }
}
