//! The fetch strategy engine.
//!
//! Classifies each intercepted request and resolves it with one of four
//! strategies. `handle` never fails: whatever goes wrong, the caller receives
//! a renderable snapshot (cached, fresh, or synthesized).

use std::sync::Arc;
use tracing::{debug, warn};

use color_eyre::Result;

use crate::cache::{PartitionManager, PartitionStore};
use crate::classify::{classify, RequestClass};
use crate::config::WorkerConfig;
use crate::fetch::fallback;
use crate::fetch::net::NetworkFetcher;
use crate::request::{Request, ResponseSnapshot};

pub struct FetchEngine<S: PartitionStore + 'static> {
  config: WorkerConfig,
  partitions: PartitionManager<S>,
  net: Arc<dyn NetworkFetcher>,
}

impl<S: PartitionStore + 'static> FetchEngine<S> {
  pub fn new(
    config: WorkerConfig,
    partitions: PartitionManager<S>,
    net: Arc<dyn NetworkFetcher>,
  ) -> Self {
    Self {
      config,
      partitions,
      net,
    }
  }

  /// Resolve an intercepted request. Classify, dispatch, and on any unhandled
  /// failure fall through to the offline/error response.
  pub async fn handle(&self, request: &Request) -> ResponseSnapshot {
    let result = match classify(request, &self.config) {
      RequestClass::Static => self.cache_first(request).await,
      RequestClass::Dynamic => self.network_first(request).await,
      RequestClass::External => self.stale_while_revalidate(request).await,
      RequestClass::Default => self.network_with_cache_fallback(request).await,
    };

    match result {
      Ok(snapshot) => snapshot,
      Err(e) => {
        warn!("fetch for {} failed: {e:#}", request.url);
        self.fallback_response(request)
      }
    }
  }

  /// Cache-first: cached snapshot if present, otherwise exactly one network
  /// fetch whose result also populates the static partition.
  async fn cache_first(&self, request: &Request) -> Result<ResponseSnapshot> {
    if let Some(cached) = self.partitions.lookup(request) {
      return Ok(cached);
    }

    let fresh = self.net.send(request.clone()).await?;
    self.store_quietly(&self.partitions.names().statics.clone(), request, &fresh);
    Ok(fresh)
  }

  /// Network-first: fresh response when reachable (also refreshing the
  /// dynamic partition), cached snapshot when not, error when neither exists.
  async fn network_first(&self, request: &Request) -> Result<ResponseSnapshot> {
    match self.net.send(request.clone()).await {
      Ok(fresh) => {
        self.store_quietly(&self.partitions.names().dynamic.clone(), request, &fresh);
        Ok(fresh)
      }
      Err(e) => self.partitions.lookup(request).ok_or(e),
    }
  }

  /// Stale-while-revalidate: a cached snapshot is returned immediately and a
  /// detached task refreshes the dynamic partition for next time. With no
  /// cached snapshot the caller waits on the network instead.
  async fn stale_while_revalidate(&self, request: &Request) -> Result<ResponseSnapshot> {
    let cached = self.partitions.lookup(request);

    let refresh = {
      let net = Arc::clone(&self.net);
      let partitions = self.partitions.clone();
      let dynamic = self.partitions.names().dynamic.clone();
      let request = request.clone();

      async move {
        let fresh = net.send(request.clone()).await?;
        if let Err(e) = partitions.store(&dynamic, &request, &fresh) {
          warn!("failed to store refreshed {}: {e:#}", request.url);
        }
        Ok::<_, color_eyre::Report>(fresh)
      }
    };

    match cached {
      Some(snapshot) => {
        // The refresh outcome is observed only here; it must never surface
        // to the original caller.
        tokio::spawn(async move {
          if let Err(e) = refresh.await {
            debug!("background refresh failed: {e:#}");
          }
        });
        Ok(snapshot)
      }
      None => refresh.await,
    }
  }

  /// Network with cache fallback, the default for unclassified requests.
  async fn network_with_cache_fallback(&self, request: &Request) -> Result<ResponseSnapshot> {
    match self.net.send(request.clone()).await {
      Ok(fresh) => Ok(fresh),
      Err(e) => self.partitions.lookup(request).ok_or(e),
    }
  }

  /// A store failure never aborts the request it rode in on.
  fn store_quietly(&self, partition: &str, request: &Request, snapshot: &ResponseSnapshot) {
    if let Err(e) = self.partitions.store(partition, request, snapshot) {
      warn!("failed to cache {}: {e:#}", request.url);
    }
  }

  /// Last resort: document requests get the cached root page or the fixed
  /// offline notice; anything else gets a synthesized error.
  fn fallback_response(&self, request: &Request) -> ResponseSnapshot {
    if request.accepts_document() {
      if let Ok(root) = self.config.root_url() {
        if let Some(cached_root) = self.partitions.lookup(&Request::get(root)) {
          return cached_root;
        }
      }
      return fallback::offline_page();
    }

    fallback::network_error()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{PartitionNames, SqliteStore};
  use color_eyre::eyre::eyre;
  use std::collections::HashSet;
  use std::sync::Mutex;
  use std::time::Duration;

  /// Scripted fetcher: records every call, fails for chosen URLs, and can
  /// delay each response to expose blocking request paths.
  #[derive(Default)]
  struct MockNet {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
  }

  impl MockNet {
    fn fail_url(&self, url: &str) {
      self.failing.lock().unwrap().insert(url.to_string());
    }

    fn recover_url(&self, url: &str) {
      self.failing.lock().unwrap().remove(url);
    }

    fn calls_to(&self, url: &str) -> usize {
      self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
  }

  impl NetworkFetcher for MockNet {
    fn send(&self, request: Request) -> crate::fetch::FetchFuture {
      let url = request.url.to_string();
      self.calls.lock().unwrap().push(url.clone());
      let fail = self.failing.lock().unwrap().contains(&url);
      let delay = self.delay;

      Box::pin(async move {
        if let Some(delay) = delay {
          tokio::time::sleep(delay).await;
        }
        if fail {
          Err(eyre!("connection refused: {}", url))
        } else {
          Ok(ResponseSnapshot::new(
            200,
            vec![],
            format!("net:{url}").into_bytes(),
          ))
        }
      })
    }
  }

  /// Storage where every operation errors, as if the database is gone.
  struct BrokenStore;

  impl PartitionStore for BrokenStore {
    fn put(&self, _: &str, _: &str, _: &ResponseSnapshot) -> Result<()> {
      Err(eyre!("cache storage unavailable"))
    }

    fn put_all(&self, _: &str, _: &[(String, ResponseSnapshot)]) -> Result<()> {
      Err(eyre!("cache storage unavailable"))
    }

    fn get(&self, _: &str, _: &str) -> Result<Option<ResponseSnapshot>> {
      Err(eyre!("cache storage unavailable"))
    }

    fn get_any(&self, _: &str) -> Result<Option<ResponseSnapshot>> {
      Err(eyre!("cache storage unavailable"))
    }

    fn list_partitions(&self) -> Result<Vec<String>> {
      Err(eyre!("cache storage unavailable"))
    }

    fn delete_partition(&self, _: &str) -> Result<bool> {
      Err(eyre!("cache storage unavailable"))
    }

    fn count_entries(&self, _: &str) -> Result<u64> {
      Err(eyre!("cache storage unavailable"))
    }
  }

  fn engine(net: Arc<MockNet>) -> FetchEngine<SqliteStore> {
    let config = WorkerConfig::default();
    let partitions = PartitionManager::new(
      Arc::new(SqliteStore::open_in_memory().unwrap()),
      PartitionNames::new(&config.version),
    );
    FetchEngine::new(config, partitions, net)
  }

  fn get(url: &str) -> Request {
    Request::parse_get(url).unwrap()
  }

  #[tokio::test]
  async fn cache_first_fetches_the_network_exactly_once() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://rolan-icecream.com/styles.css");

    let first = engine.handle(&request).await;
    let second = engine.handle(&request).await;
    let third = engine.handle(&request).await;

    assert_eq!(net.calls_to("https://rolan-icecream.com/styles.css"), 1);
    assert_eq!(first.body, second.body);
    assert_eq!(second.body, third.body);

    let statics = engine.partitions.names().statics.clone();
    assert!(engine.partitions.lookup_in(&statics, &request).is_some());
  }

  #[tokio::test]
  async fn network_first_returns_fresh_and_updates_the_dynamic_partition() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://rolan-icecream.com/api/menu");

    let fresh = engine.handle(&request).await;
    assert_eq!(fresh.body, b"net:https://rolan-icecream.com/api/menu");

    let dynamic = engine.partitions.names().dynamic.clone();
    assert!(engine.partitions.lookup_in(&dynamic, &request).is_some());
  }

  #[tokio::test]
  async fn network_first_falls_back_to_cache_when_offline() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://rolan-icecream.com/api/menu");

    engine.handle(&request).await;
    net.fail_url("https://rolan-icecream.com/api/menu");

    let offline = engine.handle(&request).await;
    assert_eq!(offline.body, b"net:https://rolan-icecream.com/api/menu");
  }

  #[tokio::test]
  async fn network_first_propagates_when_nothing_is_cached() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://rolan-icecream.com/api/menu");
    net.fail_url("https://rolan-icecream.com/api/menu");

    assert!(engine.network_first(&request).await.is_err());
  }

  #[tokio::test]
  async fn stale_while_revalidate_does_not_wait_on_a_slow_network() {
    let net = Arc::new(MockNet {
      delay: Some(Duration::from_secs(5)),
      ..MockNet::default()
    });
    let engine = engine(Arc::clone(&net));
    let request = get("https://fonts.gstatic.com/s/cairo/v28/other.woff2");

    let dynamic = engine.partitions.names().dynamic.clone();
    engine
      .partitions
      .store(
        &dynamic,
        &request,
        &ResponseSnapshot::new(200, vec![], b"cached font".to_vec()),
      )
      .unwrap();

    let served = tokio::time::timeout(Duration::from_millis(100), engine.handle(&request))
      .await
      .expect("cached snapshot must be returned without waiting on the network");
    assert_eq!(served.body, b"cached font");
  }

  #[tokio::test]
  async fn stale_while_revalidate_refreshes_in_the_background() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://fonts.gstatic.com/s/cairo/v28/other.woff2");

    let dynamic = engine.partitions.names().dynamic.clone();
    engine
      .partitions
      .store(
        &dynamic,
        &request,
        &ResponseSnapshot::new(200, vec![], b"stale font".to_vec()),
      )
      .unwrap();

    let served = engine.handle(&request).await;
    assert_eq!(served.body, b"stale font");

    // Let the detached refresh land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let refreshed = engine.partitions.lookup_in(&dynamic, &request).unwrap();
    assert_eq!(
      refreshed.body,
      b"net:https://fonts.gstatic.com/s/cairo/v28/other.woff2"
    );
  }

  #[tokio::test]
  async fn stale_while_revalidate_waits_on_the_network_for_a_cold_cache() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://fonts.gstatic.com/s/cairo/v28/other.woff2");

    let served = engine.handle(&request).await;
    assert_eq!(
      served.body,
      b"net:https://fonts.gstatic.com/s/cairo/v28/other.woff2"
    );

    let dynamic = engine.partitions.names().dynamic.clone();
    assert!(engine.partitions.lookup_in(&dynamic, &request).is_some());
  }

  #[tokio::test]
  async fn broken_storage_degrades_to_network_only_service() {
    let net = Arc::new(MockNet::default());
    let config = WorkerConfig::default();
    let partitions = PartitionManager::new(
      Arc::new(BrokenStore),
      PartitionNames::new(&config.version),
    );
    let engine = FetchEngine::new(config, partitions, net.clone());

    // A cache-first request still resolves, and every failed lookup reads as
    // a miss, so each request goes back to the network.
    let request = get("https://rolan-icecream.com/styles.css");
    let first = engine.handle(&request).await;
    assert_eq!(first.body, b"net:https://rolan-icecream.com/styles.css");

    let second = engine.handle(&request).await;
    assert_eq!(second.body, first.body);
    assert_eq!(net.calls_to("https://rolan-icecream.com/styles.css"), 2);

    // A network-first request drops the failed write and serves fresh.
    let api = get("https://rolan-icecream.com/api/menu");
    let served = engine.handle(&api).await;
    assert_eq!(served.status, 200);
    assert_eq!(served.body, b"net:https://rolan-icecream.com/api/menu");
  }

  #[tokio::test]
  async fn failed_document_request_gets_the_offline_page() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://rolan-icecream.com/missing-page")
      .with_header("Accept", "text/html,application/xhtml+xml");
    net.fail_url("https://rolan-icecream.com/missing-page");

    let served = engine.handle(&request).await;
    assert_eq!(served.status, 200);
    assert!(String::from_utf8(served.body).unwrap().contains("غير متصل"));
  }

  #[tokio::test]
  async fn failed_document_request_prefers_the_cached_root_page() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));

    // Prime the root page, then go offline entirely.
    let root = get("https://rolan-icecream.com/");
    engine.handle(&root).await;

    let request = get("https://rolan-icecream.com/missing-page")
      .with_header("Accept", "text/html");
    net.fail_url("https://rolan-icecream.com/missing-page");

    let served = engine.handle(&request).await;
    assert_eq!(served.body, b"net:https://rolan-icecream.com/");
  }

  #[tokio::test]
  async fn failed_non_document_request_gets_a_synthesized_error() {
    let net = Arc::new(MockNet::default());
    let engine = engine(Arc::clone(&net));
    let request = get("https://rolan-icecream.com/images/cone.webp");
    net.fail_url("https://rolan-icecream.com/images/cone.webp");

    let served = engine.handle(&request).await;
    assert_eq!(served.status, 408);
    assert_eq!(served.body, b"Network error");

    net.recover_url("https://rolan-icecream.com/images/cone.webp");
    let served = engine.handle(&request).await;
    assert_eq!(served.status, 200);
  }
}
