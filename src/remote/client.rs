use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use url::Url;

use crate::config::Config;
use crate::queue::EntryKind;

use super::types::{Collection, CreatedItem};
use super::RemoteService;

/// HTTP client for the remote data service.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
  token: String,
}

impl HttpRemote {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    let base = Url::parse(&config.remote.url)
      .map_err(|e| eyre!("Invalid remote url {}: {}", config.remote.url, e))?;

    Ok(Self {
      client: reqwest::Client::new(),
      base,
      token,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  /// Path of the subtype endpoint for a kind.
  fn detail_path(kind: EntryKind) -> &'static str {
    match kind {
      EntryKind::Task => "tasks",
      EntryKind::Note => "notes",
    }
  }
}

impl RemoteService for HttpRemote {
  fn create_item(
    &self,
    title: String,
    owner: String,
    kind: EntryKind,
  ) -> BoxFuture<'_, Result<String>> {
    Box::pin(async move {
      let url = self.endpoint("items")?;

      let created: CreatedItem = self
        .client
        .post(url)
        .bearer_auth(&self.token)
        .json(&json!({
          "title": title,
          "owner": owner,
          "kind": kind.as_str(),
        }))
        .send()
        .await
        .map_err(|e| eyre!("Failed to create item: {}", e))?
        .error_for_status()
        .map_err(|e| eyre!("Item create rejected: {}", e))?
        .json()
        .await
        .map_err(|e| eyre!("Failed to parse created item: {}", e))?;

      Ok(created.id)
    })
  }

  fn create_detail(
    &self,
    item_id: String,
    kind: EntryKind,
    fields: Map<String, Value>,
  ) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      let url = self.endpoint(Self::detail_path(kind))?;

      let mut body = fields;
      body.insert("item_id".to_string(), Value::String(item_id.clone()));

      self
        .client
        .post(url)
        .bearer_auth(&self.token)
        .json(&body)
        .send()
        .await
        .map_err(|e| eyre!("Failed to create {} detail for {}: {}", kind.as_str(), item_id, e))?
        .error_for_status()
        .map_err(|e| eyre!("{} detail for {} rejected: {}", kind.as_str(), item_id, e))?;

      Ok(())
    })
  }

  fn fetch_collection(
    &self,
    owner: String,
    collection: Collection,
  ) -> BoxFuture<'_, Result<Vec<Value>>> {
    Box::pin(async move {
      let mut url = self.endpoint(collection.path())?;
      url.query_pairs_mut().append_pair("owner", &owner);

      let records: Vec<Value> = self
        .client
        .get(url)
        .bearer_auth(&self.token)
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", collection.path(), e))?
        .error_for_status()
        .map_err(|e| eyre!("{} fetch rejected: {}", collection.path(), e))?
        .json()
        .await
        .map_err(|e| eyre!("Failed to parse {}: {}", collection.path(), e))?;

      Ok(records)
    })
  }
}
