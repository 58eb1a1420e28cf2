//! Durable offline queue for write-type operations.
//!
//! Orders and contact submissions that could not reach the network are parked
//! here and replayed, in arrival order, when a sync signal fires. An entry
//! leaves the queue only on a confirmed 2xx delivery.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::fetch::NetworkFetcher;
use crate::request::Request;

/// The two kinds of deferred write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
  Orders,
  Contact,
}

impl QueueKind {
  pub const ALL: [QueueKind; 2] = [QueueKind::Orders, QueueKind::Contact];

  /// The platform sync tag that triggers replay of this kind.
  pub fn sync_tag(self) -> &'static str {
    match self {
      QueueKind::Orders => "order-sync",
      QueueKind::Contact => "contact-sync",
    }
  }

  /// The collaborator endpoint replayed entries are POSTed to.
  pub fn endpoint(self) -> &'static str {
    match self {
      QueueKind::Orders => "/api/orders",
      QueueKind::Contact => "/api/contact",
    }
  }

  pub fn from_sync_tag(tag: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| kind.sync_tag() == tag)
  }

  fn label(self) -> &'static str {
    match self {
      QueueKind::Orders => "orders",
      QueueKind::Contact => "contact",
    }
  }
}

/// A queued write operation. Owned exclusively by the queue.
#[derive(Debug, Clone)]
pub struct PendingOperation {
  pub id: i64,
  pub payload: serde_json::Value,
  pub queued_at: DateTime<Utc>,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
  pub attempted: usize,
  pub delivered: usize,
  pub remaining: usize,
}

/// Trait for durable queue backends.
pub trait QueueStore: Send + Sync {
  /// Append a payload; returns its id. Ids are monotonically assigned, so id
  /// order is insertion order.
  fn append(&self, kind: QueueKind, payload: &serde_json::Value) -> Result<i64>;

  /// All queued entries of one kind, in insertion order.
  fn list(&self, kind: QueueKind) -> Result<Vec<PendingOperation>>;

  /// Remove one entry after a confirmed delivery.
  fn remove(&self, kind: QueueKind, id: i64) -> Result<()>;

  /// Queue length.
  fn depth(&self, kind: QueueKind) -> Result<u64>;
}

/// SQLite-backed queue store.
pub struct SqliteQueueStore {
  conn: Mutex<Connection>,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    queued_at TEXT NOT NULL,
    CHECK (kind IN ('orders', 'contact'))
);

CREATE INDEX IF NOT EXISTS idx_pending_operations_kind
    ON pending_operations(kind, id);
"#;

impl SqliteQueueStore {
  /// Open (or create) the queue at the given path. Shares the cache database
  /// file; the tables are independent.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    // The cache store opens a second connection on the same file; wait out
    // its write locks instead of surfacing SQLITE_BUSY.
    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl QueueStore for SqliteQueueStore {
  fn append(&self, kind: QueueKind, payload: &serde_json::Value) -> Result<i64> {
    let conn = self.lock()?;
    let body = serde_json::to_vec(payload)
      .map_err(|e| eyre!("Failed to serialize queued payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_operations (kind, payload, queued_at) VALUES (?, ?, ?)",
        params![kind.label(), body, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to queue {} operation: {}", kind.label(), e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list(&self, kind: QueueKind) -> Result<Vec<PendingOperation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, payload, queued_at FROM pending_operations
         WHERE kind = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(i64, Vec<u8>, String)> = stmt
      .query_map(params![kind.label()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to list queued operations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    rows
      .into_iter()
      .map(|(id, payload, queued_at)| {
        let payload = serde_json::from_slice(&payload)
          .map_err(|e| eyre!("Failed to parse queued payload {}: {}", id, e))?;
        let queued_at = DateTime::parse_from_rfc3339(&queued_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse queued_at '{}': {}", queued_at, e))?;

        Ok(PendingOperation {
          id,
          payload,
          queued_at,
        })
      })
      .collect()
  }

  fn remove(&self, kind: QueueKind, id: i64) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "DELETE FROM pending_operations WHERE kind = ? AND id = ?",
        params![kind.label(), id],
      )
      .map_err(|e| eyre!("Failed to remove queued operation {}: {}", id, e))?;

    Ok(())
  }

  fn depth(&self, kind: QueueKind) -> Result<u64> {
    let conn = self.lock()?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM pending_operations WHERE kind = ?",
        params![kind.label()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count queued operations: {}", e))?;

    Ok(count)
  }
}

/// The offline sync queue over a durable backend.
pub struct OfflineQueue<Q: QueueStore> {
  store: Arc<Q>,
}

impl<Q: QueueStore> OfflineQueue<Q> {
  pub fn new(store: Arc<Q>) -> Self {
    Self { store }
  }

  /// Park a payload for later delivery. Durable as soon as this returns.
  pub fn enqueue(&self, kind: QueueKind, payload: serde_json::Value) -> Result<i64> {
    let id = self.store.append(kind, &payload)?;
    info!("queued {} operation {id} for later delivery", kind.label());
    Ok(id)
  }

  pub fn depth(&self, kind: QueueKind) -> Result<u64> {
    self.store.depth(kind)
  }

  /// Replay queued entries of one kind against `endpoint`.
  ///
  /// Iterates a snapshot of the list in insertion order: one POST attempt per
  /// entry per pass, removal only on a 2xx, and one failing entry never stops
  /// the entries behind it.
  pub async fn replay(
    &self,
    kind: QueueKind,
    net: &dyn NetworkFetcher,
    endpoint: &Url,
  ) -> Result<ReplayReport> {
    let pending = self.store.list(kind)?;
    let attempted = pending.len();
    let mut delivered = 0;

    for operation in pending {
      let request = Request::post_json(endpoint.clone(), &operation.payload);
      match net.send(request).await {
        Ok(response) if response.is_success() => {
          if let Err(e) = self.store.remove(kind, operation.id) {
            warn!("delivered {} operation {} but failed to dequeue it: {e:#}", kind.label(), operation.id);
          } else {
            delivered += 1;
          }
        }
        Ok(response) => {
          warn!(
            "{} operation {} rejected with status {}, keeping it queued",
            kind.label(),
            operation.id,
            response.status
          );
        }
        Err(e) => {
          warn!(
            "{} operation {} still unreachable: {e:#}",
            kind.label(),
            operation.id
          );
        }
      }
    }

    let remaining = self.store.depth(kind)? as usize;
    info!(
      "sync pass for {}: {delivered}/{attempted} delivered, {remaining} remaining",
      kind.label()
    );

    Ok(ReplayReport {
      attempted,
      delivered,
      remaining,
    })
  }
}

impl<Q: QueueStore> Clone for OfflineQueue<Q> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::FetchFuture;
  use crate::request::ResponseSnapshot;
  use color_eyre::eyre::eyre;
  use serde_json::json;

  /// Fetcher that fails any send whose body contains a marker string.
  #[derive(Default)]
  struct MarkerFailingNet {
    fail_marker: String,
    reject_marker: String,
  }

  impl NetworkFetcher for MarkerFailingNet {
    fn send(&self, request: Request) -> FetchFuture {
      let body = String::from_utf8(request.body.clone().unwrap_or_default()).unwrap();
      let fail = !self.fail_marker.is_empty() && body.contains(&self.fail_marker);
      let reject = !self.reject_marker.is_empty() && body.contains(&self.reject_marker);

      Box::pin(async move {
        if fail {
          Err(eyre!("connection refused"))
        } else if reject {
          Ok(ResponseSnapshot::new(500, vec![], vec![]))
        } else {
          Ok(ResponseSnapshot::new(201, vec![], vec![]))
        }
      })
    }
  }

  fn queue() -> OfflineQueue<SqliteQueueStore> {
    OfflineQueue::new(Arc::new(SqliteQueueStore::open_in_memory().unwrap()))
  }

  fn endpoint() -> Url {
    Url::parse("https://rolan-icecream.com/api/orders").unwrap()
  }

  #[test]
  fn sync_tags_round_trip() {
    assert_eq!(QueueKind::from_sync_tag("order-sync"), Some(QueueKind::Orders));
    assert_eq!(QueueKind::from_sync_tag("contact-sync"), Some(QueueKind::Contact));
    assert_eq!(QueueKind::from_sync_tag("menu-update"), None);
  }

  #[test]
  fn enqueue_is_durable_and_ordered() {
    let queue = queue();
    let first = queue.enqueue(QueueKind::Orders, json!({"n": 1})).unwrap();
    let second = queue.enqueue(QueueKind::Orders, json!({"n": 2})).unwrap();
    assert!(second > first);

    assert_eq!(queue.depth(QueueKind::Orders).unwrap(), 2);
    assert_eq!(queue.depth(QueueKind::Contact).unwrap(), 0);
  }

  #[tokio::test]
  async fn replay_removes_only_confirmed_deliveries() {
    let queue = queue();
    queue.enqueue(QueueKind::Orders, json!({"order": "one"})).unwrap();
    queue.enqueue(QueueKind::Orders, json!({"order": "two"})).unwrap();
    queue.enqueue(QueueKind::Orders, json!({"order": "three"})).unwrap();

    let net = MarkerFailingNet {
      fail_marker: "two".to_string(),
      ..MarkerFailingNet::default()
    };

    let report = queue.replay(QueueKind::Orders, &net, &endpoint()).await.unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 1);

    // The failing entry keeps its position relative to newly queued entries.
    queue.enqueue(QueueKind::Orders, json!({"order": "four"})).unwrap();
    let left: Vec<_> = queue
      .store
      .list(QueueKind::Orders)
      .unwrap()
      .into_iter()
      .map(|op| op.payload["order"].as_str().unwrap().to_string())
      .collect();
    assert_eq!(left, vec!["two", "four"]);
  }

  #[tokio::test]
  async fn non_2xx_responses_keep_the_entry_queued() {
    let queue = queue();
    queue.enqueue(QueueKind::Contact, json!({"msg": "rejected"})).unwrap();

    let net = MarkerFailingNet {
      reject_marker: "rejected".to_string(),
      ..MarkerFailingNet::default()
    };

    let report = queue.replay(QueueKind::Contact, &net, &endpoint()).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);
  }

  #[tokio::test]
  async fn a_second_trigger_delivers_what_recovered() {
    let queue = queue();
    queue.enqueue(QueueKind::Orders, json!({"order": "two"})).unwrap();

    let failing = MarkerFailingNet {
      fail_marker: "two".to_string(),
      ..MarkerFailingNet::default()
    };
    queue.replay(QueueKind::Orders, &failing, &endpoint()).await.unwrap();
    assert_eq!(queue.depth(QueueKind::Orders).unwrap(), 1);

    let recovered = MarkerFailingNet::default();
    let report = queue.replay(QueueKind::Orders, &recovered, &endpoint()).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(queue.depth(QueueKind::Orders).unwrap(), 0);
  }

  #[test]
  fn cache_and_queue_share_one_database_file() {
    use crate::cache::{PartitionStore, SqliteStore};

    let path =
      std::env::temp_dir().join(format!("rolan-worker-shared-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let cache = SqliteStore::open(&path).unwrap();
    let queue = SqliteQueueStore::open(&path).unwrap();

    cache
      .put(
        "rolan-static-v1.0.0",
        "k",
        &ResponseSnapshot::new(200, vec![], b"page".to_vec()),
      )
      .unwrap();
    queue.append(QueueKind::Orders, &json!({"order": "one"})).unwrap();

    let found = cache.get("rolan-static-v1.0.0", "k").unwrap().unwrap();
    assert_eq!(found.body, b"page");
    assert_eq!(queue.depth(QueueKind::Orders).unwrap(), 1);

    drop(cache);
    drop(queue);
    let _ = std::fs::remove_file(&path);
  }
}
