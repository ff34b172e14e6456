use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Override for the data directory (store + caches + logs).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the remote data service.
  pub url: String,
  /// Owner identity stamped on created records.
  pub owner: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache-set version; bump on every deployment that changes precached assets.
  #[serde(default = "default_cache_version")]
  pub version: u32,
  /// App origin the precache manifest is resolved against.
  #[serde(default = "default_app_origin")]
  pub app_origin: String,
  /// Paths pre-cached at install time, relative to the app origin.
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Path of the offline fallback document.
  #[serde(default = "default_offline_path")]
  pub offline_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Connectivity poll interval in seconds.
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
}

fn default_cache_version() -> u32 {
  1
}

fn default_app_origin() -> String {
  "https://ondeck.app".to_string()
}

fn default_precache() -> Vec<String> {
  vec![
    "/".to_string(),
    "/offline.html".to_string(),
    "/manifest.webmanifest".to_string(),
    "/icons/icon-192.png".to_string(),
    "/icons/icon-512.png".to_string(),
  ]
}

fn default_offline_path() -> String {
  "/offline.html".to_string()
}

fn default_poll_interval() -> u64 {
  5
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      app_origin: default_app_origin(),
      precache: default_precache(),
      offline_path: default_offline_path(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: default_poll_interval(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ondeck-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ondeck-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/ondeck-sync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("ondeck-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ondeck-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the remote API token from environment variables.
  ///
  /// Checks ONDECK_API_TOKEN first, then ONDECK_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("ONDECK_API_TOKEN")
      .or_else(|_| std::env::var("ONDECK_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set ONDECK_API_TOKEN or ONDECK_TOKEN environment variable.")
      })
  }

  /// Host of the remote data service, used by the router's bypass rule.
  pub fn remote_host(&self) -> Result<String> {
    let url = Url::parse(&self.remote.url)
      .map_err(|e| eyre!("Invalid remote url {}: {}", self.remote.url, e))?;
    url
      .host_str()
      .map(String::from)
      .ok_or_else(|| eyre!("Remote url {} has no host", self.remote.url))
  }

  /// Absolute URLs of the precache manifest.
  pub fn precache_manifest(&self) -> Result<Vec<Url>> {
    let origin = Url::parse(&self.cache.app_origin)
      .map_err(|e| eyre!("Invalid app origin {}: {}", self.cache.app_origin, e))?;

    self
      .cache
      .precache
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))
      })
      .collect()
  }

  /// Absolute URL of the offline fallback document.
  pub fn offline_fallback_url(&self) -> Result<Url> {
    let origin = Url::parse(&self.cache.app_origin)
      .map_err(|e| eyre!("Invalid app origin {}: {}", self.cache.app_origin, e))?;
    origin
      .join(&self.cache.offline_path)
      .map_err(|e| eyre!("Invalid offline path {}: {}", self.cache.offline_path, e))
  }
}
