//! Request/response model and the network fetch boundary.
//!
//! The engine never talks to the network directly; everything goes through
//! the [`Fetcher`] trait so strategies and lifecycle can be exercised against
//! a scripted stub. [`HttpFetcher`] is the real implementation.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use url::Url;

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  /// Uppercase HTTP method.
  pub method: String,
  pub url: Url,
  /// Value of the Accept header, if any.
  pub accept: Option<String>,
}

impl FetchRequest {
  /// Build a GET request for `url`.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      accept: None,
    }
  }

  pub fn with_accept(mut self, accept: &str) -> Self {
    self.accept = Some(accept.to_string());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// Whether the Accept header asks for an HTML document.
  pub fn wants_document(&self) -> bool {
    self
      .accept
      .as_deref()
      .map(|a| a.contains("text/html"))
      .unwrap_or(false)
  }
}

/// A captured response snapshot.
///
/// The body is owned bytes, so cloning a response for cache storage is safe;
/// there is no single-consumption stream to worry about at this layer.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  pub fn ok(content_type: &str, body: Vec<u8>) -> Self {
    Self {
      status: 200,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body,
    }
  }

  /// Synthetic 404 returned when an image misses the cache and the network.
  pub fn not_found() -> Self {
    Self {
      status: 404,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: b"Not found".to_vec(),
    }
  }

  /// Synthetic offline shell, returned only if the precached fallback
  /// document is itself missing.
  pub fn offline_fallback() -> Self {
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: b"<html><body><h1>Offline</h1></body></html>".to_vec(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Network boundary for intercepted requests.
pub trait Fetcher: Send + Sync {
  /// Perform the request against the live network.
  fn fetch<'a>(&'a self, req: &'a FetchRequest) -> BoxFuture<'a, Result<FetchResponse>>;
}

/// Fetcher backed by a shared reqwest client.
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }
}

impl Default for HttpFetcher {
  fn default() -> Self {
    Self::new()
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, req: &'a FetchRequest) -> BoxFuture<'a, Result<FetchResponse>> {
    Box::pin(async move {
      let method = reqwest::Method::from_bytes(req.method.as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", req.method, e))?;

      let mut builder = self.client.request(method, req.url.clone());
      if let Some(accept) = &req.accept {
        builder = builder.header(reqwest::header::ACCEPT, accept);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Fetch failed for {}: {}", req.url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| {
          v.to_str()
            .ok()
            .map(|v| (k.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body for {}: {}", req.url, e))?
        .to_vec();

      Ok(FetchResponse {
        status,
        headers,
        body,
      })
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wants_document_matches_html_accept() {
    let url = Url::parse("https://ondeck.app/today").unwrap();
    let req = FetchRequest::get(url).with_accept("text/html,application/xhtml+xml");
    assert!(req.wants_document());
  }

  #[test]
  fn test_plain_get_is_not_a_document() {
    let url = Url::parse("https://ondeck.app/app.js").unwrap();
    let req = FetchRequest::get(url);
    assert!(!req.wants_document());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let resp = FetchResponse::ok("text/css", b"body{}".to_vec());
    assert_eq!(resp.header("Content-Type"), Some("text/css"));
  }
}
