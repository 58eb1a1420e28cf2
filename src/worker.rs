//! The worker lifecycle controller.
//!
//! Owns the install/activate/fetch/message/sync/push event handlers and wires
//! the classifier, strategy engine, partition manager and offline queue
//! together. Platform capabilities (open pages, notifications) sit behind
//! traits so a host embeds the worker and supplies its own.

use color_eyre::{eyre::eyre, Result};
use futures::future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::{PartitionManager, PartitionNames, PartitionStore};
use crate::classify;
use crate::config::WorkerConfig;
use crate::fetch::{FetchEngine, NetworkFetcher};
use crate::queue::{OfflineQueue, QueueKind, QueueStore, ReplayReport};
use crate::request::{Request, ResponseSnapshot};

/// Standard lifecycle of a versioned worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Waiting,
  Active,
  Redundant,
}

/// Cross-instance messages, always available regardless of state.
#[derive(Debug)]
pub enum Message {
  /// `{type: "SKIP_WAITING"}` — skip the waiting phase, no reply.
  SkipWaiting,
  /// `{type: "GET_VERSION"}` — report the versioned umbrella partition name
  /// over the reply channel.
  GetVersion { reply: oneshot::Sender<VersionInfo> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
  pub version: String,
}

/// Periodic background sync tag for the menu refresh.
pub const MENU_UPDATE_TAG: &str = "menu-update";

/// Pages currently governed by (or reachable from) the worker.
pub trait ClientRegistry: Send + Sync {
  /// Govern all open pages immediately instead of waiting for their next
  /// navigation.
  fn claim_all(&self) -> Result<()>;

  /// Open or focus a page at the given URL.
  fn open_window(&self, url: &url::Url) -> Result<()>;
}

/// Notification display surface.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

impl Notification {
  /// The fixed push notification: payload text as body when present, the
  /// default Arabic message otherwise, and the two `view`/`close` actions.
  pub fn for_push(payload: Option<&str>) -> Self {
    Self {
      title: "رولان آيس كريم".to_string(),
      body: payload
        .unwrap_or("رسالة جديدة من رولان آيس كريم")
        .to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
      actions: vec![
        NotificationAction {
          action: "view".to_string(),
          title: "عرض".to_string(),
        },
        NotificationAction {
          action: "close".to_string(),
          title: "إغلاق".to_string(),
        },
      ],
    }
  }
}

pub struct Worker<S: PartitionStore + 'static, Q: QueueStore> {
  config: WorkerConfig,
  state: WorkerState,
  partitions: PartitionManager<S>,
  engine: FetchEngine<S>,
  queue: OfflineQueue<Q>,
  net: Arc<dyn NetworkFetcher>,
  clients: Arc<dyn ClientRegistry>,
  notifier: Arc<dyn Notifier>,
}

impl<S: PartitionStore + 'static, Q: QueueStore> Worker<S, Q> {
  pub fn new(
    config: WorkerConfig,
    store: Arc<S>,
    queue_store: Arc<Q>,
    net: Arc<dyn NetworkFetcher>,
    clients: Arc<dyn ClientRegistry>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    let names = PartitionNames::new(&config.version);
    let partitions = PartitionManager::new(store, names);
    let engine = FetchEngine::new(config.clone(), partitions.clone(), Arc::clone(&net));
    let queue = OfflineQueue::new(queue_store);

    Self {
      config,
      state: WorkerState::Installing,
      partitions,
      engine,
      queue,
      net,
      clients,
      notifier,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn version(&self) -> &str {
    &self.config.version
  }

  pub fn queue(&self) -> &OfflineQueue<Q> {
    &self.queue
  }

  pub fn partitions(&self) -> &PartitionManager<S> {
    &self.partitions
  }

  /// Install: prime the static partition with the full manifest as a batch.
  ///
  /// All-or-nothing: if any asset fails to fetch, nothing is committed and
  /// the install attempt fails, leaving any previous version governing. On
  /// success the waiting phase is skipped outright (explicit policy).
  pub async fn handle_install(&mut self) -> Result<()> {
    let urls = self.config.manifest_urls()?;
    info!("installing {}: priming {} static assets", self.config.version, urls.len());

    let fetches = urls.into_iter().map(|url| {
      let request = Request::get(url);
      let net = Arc::clone(&self.net);
      async move {
        let snapshot = net.send(request.clone()).await?;
        Ok::<_, color_eyre::Report>((request, snapshot))
      }
    });

    let primed = future::try_join_all(fetches)
      .await
      .map_err(|e| eyre!("Install aborted, static asset unreachable: {}", e))?;

    let statics = self.partitions.names().statics.clone();
    self
      .partitions
      .store_batch(&statics, &primed)
      .map_err(|e| eyre!("Install aborted, failed to commit static cache: {}", e))?;

    info!("install complete, skipping the waiting phase");
    self.state = WorkerState::Active;
    Ok(())
  }

  /// Activate: reclaim partitions from prior versions and govern all open
  /// pages immediately. Idempotent; in-flight requests served by an outgoing
  /// instance are not disturbed.
  pub fn handle_activate(&mut self) -> Result<()> {
    let names = self.partitions.names().clone();
    let deleted = self.partitions.reclaim(&names.keep_set())?;
    self.clients.claim_all()?;
    self.state = WorkerState::Active;

    info!("activated {} ({deleted} stale partitions reclaimed)", self.config.version);
    Ok(())
  }

  /// Fetch: `None` means pass through untouched (non-GET or non-http(s));
  /// otherwise the strategy engine always produces a response.
  pub async fn handle_fetch(&self, request: &Request) -> Option<ResponseSnapshot> {
    if !classify::should_intercept(request) {
      return None;
    }
    Some(self.engine.handle(request).await)
  }

  /// Cross-instance messaging.
  pub fn handle_message(&mut self, message: Message) {
    match message {
      Message::SkipWaiting => {
        if self.state == WorkerState::Waiting || self.state == WorkerState::Installing {
          info!("skip-waiting requested, activating {}", self.config.version);
          self.state = WorkerState::Active;
        }
      }
      Message::GetVersion { reply } => {
        // Replies with the umbrella partition name, which carries the
        // version. The asking page may already be gone; that is not our
        // problem.
        let _ = reply.send(VersionInfo {
          version: self.partitions.names().umbrella.clone(),
        });
      }
    }
  }

  /// Connectivity-restored signal: replay the queue the tag names.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<ReplayReport>> {
    let Some(kind) = QueueKind::from_sync_tag(tag) else {
      debug!("ignoring unknown sync tag {tag}");
      return Ok(None);
    };

    let endpoint = self.config.api_url(kind.endpoint())?;
    let report = self.queue.replay(kind, self.net.as_ref(), &endpoint).await?;
    Ok(Some(report))
  }

  /// Periodic sync: refresh the menu snapshot in the dynamic partition.
  /// Network failures are logged, not surfaced; the stale menu stays.
  pub async fn handle_periodic_sync(&self, tag: &str) -> Result<()> {
    if tag != MENU_UPDATE_TAG {
      debug!("ignoring unknown periodic sync tag {tag}");
      return Ok(());
    }

    let request = Request::get(self.config.api_url("/api/menu")?);
    match self.net.send(request.clone()).await {
      Ok(snapshot) if snapshot.is_success() => {
        let dynamic = self.partitions.names().dynamic.clone();
        if let Err(e) = self.partitions.store(&dynamic, &request, &snapshot) {
          warn!("failed to store refreshed menu: {e:#}");
        } else {
          info!("menu cache refreshed");
        }
      }
      Ok(snapshot) => warn!("menu refresh rejected with status {}", snapshot.status),
      Err(e) => warn!("menu refresh failed: {e:#}"),
    }

    Ok(())
  }

  /// Push receipt: show the fixed notification, with the payload text as
  /// the body when present.
  pub fn handle_push(&self, payload: Option<&str>) -> Result<()> {
    self.notifier.show(&Notification::for_push(payload))
  }

  /// Notification click: the `view` action opens (or focuses) the root page.
  pub fn handle_notification_click(&self, action: &str) -> Result<()> {
    if action == "view" {
      self.clients.open_window(&self.config.root_url()?)?;
    }
    Ok(())
  }
}
