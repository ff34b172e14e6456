//! Install/activate lifecycle for the versioned cache set.
//!
//! Install pre-populates the static cache from a fixed manifest,
//! all-or-nothing: every asset is fetched before anything is written, so a
//! single unreachable asset never leaves a half-populated baseline.
//! Activate deletes every cache whose name is not in the current valid set;
//! the engine runs it to completion before the router is constructed, so no
//! request is ever served from a previous deployment's caches.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use url::Url;

use super::set::{CacheNames, CacheRole, CacheSet};
use crate::fetch::{FetchRequest, Fetcher};

/// Lifecycle phase of the cache set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
  Installing,
  Installed,
  Activating,
  Active,
}

/// Governs install and activate transitions for the cache set.
pub struct LifecycleManager {
  caches: Arc<CacheSet>,
  fetcher: Arc<dyn Fetcher>,
  names: CacheNames,
  manifest: Vec<Url>,
  phase: LifecyclePhase,
}

impl LifecycleManager {
  pub fn new(
    caches: Arc<CacheSet>,
    fetcher: Arc<dyn Fetcher>,
    names: CacheNames,
    manifest: Vec<Url>,
  ) -> Self {
    Self {
      caches,
      fetcher,
      names,
      manifest,
      phase: LifecyclePhase::Installing,
    }
  }

  pub fn phase(&self) -> LifecyclePhase {
    self.phase
  }

  /// Pre-populate the current static cache from the manifest.
  ///
  /// Fetches everything first, then stores everything; any fetch failure
  /// fails the whole step with nothing written.
  pub async fn install(&mut self) -> Result<()> {
    self.phase = LifecyclePhase::Installing;

    let mut fetched = Vec::with_capacity(self.manifest.len());
    for url in &self.manifest {
      let req = FetchRequest::get(url.clone());
      let resp = self
        .fetcher
        .fetch(&req)
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", url, e))?;

      if !resp.is_success() {
        return Err(eyre!("Pre-cache of {} returned status {}", url, resp.status));
      }

      fetched.push((req, resp));
    }

    let static_cache = self.names.name(CacheRole::Static);
    self.caches.open_cache(&static_cache)?;
    for (req, resp) in &fetched {
      self.caches.put(&static_cache, req, resp)?;
    }

    info!(
      cache = %static_cache,
      assets = fetched.len(),
      "install complete"
    );
    self.phase = LifecyclePhase::Installed;

    Ok(())
  }

  /// Delete stale caches and open the current valid set.
  ///
  /// Returns the names that were deleted.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    self.phase = LifecyclePhase::Activating;

    let valid = self.names.valid_set();
    let mut deleted = Vec::new();

    for name in self.caches.cache_names()? {
      if !valid.contains(&name) {
        debug!(cache = %name, "deleting stale cache");
        self.caches.delete_cache(&name)?;
        deleted.push(name);
      }
    }

    for name in &valid {
      self.caches.open_cache(name)?;
    }

    info!(deleted = deleted.len(), "activate complete");
    self.phase = LifecyclePhase::Active;

    Ok(deleted)
  }
}
