//! Network fetcher seam.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::pin::Pin;

use crate::request::{Request, ResponseSnapshot};

/// A boxed future resolving to a drained response snapshot.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<ResponseSnapshot>> + Send + 'static>>;

/// The engine's only door to the network.
///
/// Implementations must drain the response body into the snapshot before
/// resolving; response streams never escape this boundary, which is what makes
/// "return to caller AND store in cache" a plain `clone()` upstream.
pub trait NetworkFetcher: Send + Sync {
  fn send(&self, request: Request) -> FetchFuture;
}

/// Production fetcher over reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent("rolan-worker/0.1")
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl NetworkFetcher for HttpFetcher {
  fn send(&self, request: Request) -> FetchFuture {
    let client = self.client.clone();

    Box::pin(async move {
      let mut builder = client.request(request.method.clone(), request.url.clone());
      for (name, value) in request.headers() {
        builder = builder.header(name.as_str(), value.as_str());
      }
      if let Some(body) = &request.body {
        builder = builder.body(body.clone());
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
        .to_vec();

      Ok(ResponseSnapshot::new(status, headers, body))
    })
  }
}
