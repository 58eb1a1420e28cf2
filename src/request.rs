//! Request and response snapshot types.
//!
//! A [`ResponseSnapshot`] is an owned, fully drained capture of a network
//! response. It is the only currency between "return to caller" and "store in
//! cache": dual use is a `clone()`, never a second read of a body stream.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

pub use reqwest::Method;

/// An intercepted or outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  headers: Vec<(String, String)>,
  /// Only write-type sends carry a body; cached keys are GET-only.
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// A plain GET request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A plain GET request from a URL string (convenience for tests and tools).
  pub fn parse_get(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
    Ok(Self::get(url))
  }

  /// A JSON POST, as sent for queued orders and contact submissions.
  pub fn post_json(url: Url, payload: &serde_json::Value) -> Self {
    Self {
      method: Method::POST,
      url,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(payload.to_string().into_bytes()),
    }
  }

  /// Attach a header (builder style).
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup; first match wins.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn headers(&self) -> &[(String, String)] {
    &self.headers
  }

  /// Whether the caller declared acceptance of a markup document.
  /// Decides between the offline page and a bare error response on failure.
  pub fn accepts_document(&self) -> bool {
    self
      .header("accept")
      .map(|v| v.contains("text/html"))
      .unwrap_or(false)
  }

  /// Stable storage key for this request: SHA-256 over method and full URL,
  /// query string included.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Immutable capture of a response: status, headers, body bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// When this snapshot was taken.
  pub stored_at: DateTime<Utc>,
}

impl ResponseSnapshot {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      stored_at: Utc::now(),
    }
  }

  /// 2xx-class result, the queue's definition of a confirmed delivery.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
