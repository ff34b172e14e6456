//! Per-request cache strategy selection and execution.
//!
//! Every intercepted request is classified once, first match wins:
//! non-GET and remote-data-service requests bypass the cache entirely,
//! documents are network-first, images are cache-first, and every other GET
//! is stale-while-revalidate. Caching is an optimization: a store failure
//! never changes the response handed back to the caller.

use std::sync::Arc;

use color_eyre::Result;
use tracing::{debug, warn};
use url::Url;

use super::set::{CacheNames, CacheRole, CacheSet};
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};

/// File extensions routed to the image cache.
const IMAGE_EXTENSIONS: [&str; 7] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico"];

/// The strategy chosen for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Pass through to the network, never cached.
  Bypass,
  /// Live response preferred; cache and offline fallback on failure.
  NetworkFirst,
  /// Cached response preferred; network only on miss.
  CacheFirst,
  /// Cached response returned immediately, refreshed in the background.
  StaleWhileRevalidate,
}

/// Routes intercepted requests through the named cache set.
pub struct StrategyRouter {
  caches: Arc<CacheSet>,
  fetcher: Arc<dyn Fetcher>,
  names: CacheNames,
  remote_host: String,
  offline_fallback: Url,
}

impl StrategyRouter {
  pub fn new(
    caches: Arc<CacheSet>,
    fetcher: Arc<dyn Fetcher>,
    names: CacheNames,
    remote_host: String,
    offline_fallback: Url,
  ) -> Self {
    Self {
      caches,
      fetcher,
      names,
      remote_host,
      offline_fallback,
    }
  }

  /// Decide which strategy applies to `req`. First match wins.
  pub fn classify(&self, req: &FetchRequest) -> Strategy {
    if !req.is_get() {
      return Strategy::Bypass;
    }

    // Live reads only for the data service; caching these would silently
    // serve stale application data.
    if req.url.host_str() == Some(self.remote_host.as_str()) {
      return Strategy::Bypass;
    }

    if req.wants_document() {
      return Strategy::NetworkFirst;
    }

    let path = req.url.path().to_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
      return Strategy::CacheFirst;
    }

    Strategy::StaleWhileRevalidate
  }

  /// Execute the applicable strategy for `req`.
  pub async fn handle(&self, req: FetchRequest) -> Result<FetchResponse> {
    match self.classify(&req) {
      Strategy::Bypass => self.fetcher.fetch(&req).await,
      Strategy::NetworkFirst => Ok(self.network_first(&req).await),
      Strategy::CacheFirst => Ok(self.cache_first(&req).await),
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&req).await,
    }
  }

  /// Documents: live response when online, cached page or the precached
  /// offline fallback when not.
  async fn network_first(&self, req: &FetchRequest) -> FetchResponse {
    let pages = self.names.name(CacheRole::Pages);

    match self.fetcher.fetch(req).await {
      Ok(resp) => {
        if resp.is_success() {
          self.store_quietly(&pages, req, &resp);
        }
        resp
      }
      Err(e) => {
        debug!(url = %req.url, error = %e, "document fetch failed, falling back to cache");

        if let Some(cached) = self.lookup_quietly(&pages, req) {
          return cached;
        }

        let fallback_req = FetchRequest::get(self.offline_fallback.clone());
        let static_cache = self.names.name(CacheRole::Static);
        self
          .lookup_quietly(&static_cache, &fallback_req)
          .unwrap_or_else(FetchResponse::offline_fallback)
      }
    }
  }

  /// Images: cached copy wins outright; synthetic 404 on total failure.
  async fn cache_first(&self, req: &FetchRequest) -> FetchResponse {
    let images = self.names.name(CacheRole::Images);

    if let Some(cached) = self.lookup_quietly(&images, req) {
      return cached;
    }

    match self.fetcher.fetch(req).await {
      Ok(resp) => {
        if resp.is_success() {
          self.store_quietly(&images, req, &resp);
        }
        resp
      }
      Err(e) => {
        debug!(url = %req.url, error = %e, "image miss and fetch failed");
        FetchResponse::not_found()
      }
    }
  }

  /// Scripts, styles, fonts: return the cached value immediately and refresh
  /// it in the background; only a cold miss awaits the network.
  async fn stale_while_revalidate(&self, req: &FetchRequest) -> Result<FetchResponse> {
    let dynamic = self.names.name(CacheRole::Dynamic);

    if let Some(cached) = self.lookup_quietly(&dynamic, req) {
      self.spawn_refresh(dynamic, req.clone());
      return Ok(cached);
    }

    let resp = self.fetcher.fetch(req).await?;
    if resp.is_success() {
      self.store_quietly(&dynamic, req, &resp);
    }
    Ok(resp)
  }

  /// Detached background refresh of a cache entry. Failures are logged and
  /// swallowed; nothing awaits this task.
  fn spawn_refresh(&self, cache_name: String, req: FetchRequest) {
    let fetcher = Arc::clone(&self.fetcher);
    let caches = Arc::clone(&self.caches);

    tokio::spawn(async move {
      match fetcher.fetch(&req).await {
        Ok(resp) if resp.is_success() => {
          if let Err(e) = caches.put(&cache_name, &req, &resp) {
            warn!(url = %req.url, error = %e, "background refresh store failed");
          }
        }
        Ok(resp) => {
          debug!(url = %req.url, status = resp.status, "background refresh got non-success");
        }
        Err(e) => {
          debug!(url = %req.url, error = %e, "background refresh fetch failed");
        }
      }
    });
  }

  fn store_quietly(&self, cache_name: &str, req: &FetchRequest, resp: &FetchResponse) {
    if let Err(e) = self.caches.put(cache_name, req, resp) {
      warn!(url = %req.url, error = %e, "cache store failed");
    }
  }

  fn lookup_quietly(&self, cache_name: &str, req: &FetchRequest) -> Option<FetchResponse> {
    match self.caches.lookup(cache_name, req) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %req.url, error = %e, "cache lookup failed");
        None
      }
    }
  }
}
