//! Partition storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::request::ResponseSnapshot;

/// Trait for partitioned snapshot storage backends.
///
/// Partitions come into existence on first `put` and die wholesale via
/// `delete_partition`; there is no separate create step.
pub trait PartitionStore: Send + Sync {
  /// Store a snapshot under `key`. Overwrites atomically: a reader sees either
  /// the old snapshot or the new one, never a partial write.
  fn put(&self, partition: &str, key: &str, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Store a batch of snapshots in one commit. All-or-nothing: a failure on
  /// any entry leaves the partition exactly as it was.
  fn put_all(&self, partition: &str, entries: &[(String, ResponseSnapshot)]) -> Result<()>;

  /// Look up a snapshot in one partition.
  fn get(&self, partition: &str, key: &str) -> Result<Option<ResponseSnapshot>>;

  /// Look up a snapshot across all partitions, most recent write first.
  fn get_any(&self, key: &str) -> Result<Option<ResponseSnapshot>>;

  /// All partition names currently holding entries.
  fn list_partitions(&self) -> Result<Vec<String>>;

  /// Delete a whole partition. Returns whether anything was deleted.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Number of entries in a partition.
  fn count_entries(&self, partition: &str) -> Result<u64>;
}

/// SQLite-backed partition store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key
    ON cache_entries(request_key);
"#;

impl SqliteStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    // The queue store opens a second connection on the same file; wait out
    // its write locks instead of surfacing SQLITE_BUSY.
    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn insert_entry(
  conn: &Connection,
  partition: &str,
  key: &str,
  snapshot: &ResponseSnapshot,
) -> Result<()> {
  let headers = serde_json::to_vec(&snapshot.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  // INSERT OR REPLACE is the write-then-swap: the row flips in one statement.
  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (partition, request_key, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        partition,
        key,
        snapshot.status,
        headers,
        snapshot.body,
        snapshot.stored_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

  Ok(())
}

impl PartitionStore for SqliteStore {
  fn put(&self, partition: &str, key: &str, snapshot: &ResponseSnapshot) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, partition, key, snapshot)
  }

  fn put_all(&self, partition: &str, entries: &[(String, ResponseSnapshot)]) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, snapshot) in entries {
      if let Err(e) = insert_entry(&conn, partition, key, snapshot) {
        let _ = conn.execute("ROLLBACK", []);
        return Err(e);
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<ResponseSnapshot>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE partition = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![partition, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    row.map(row_to_snapshot).transpose()
  }

  fn get_any(&self, key: &str) -> Result<Option<ResponseSnapshot>> {
    let conn = self.lock()?;

    // rowid breaks same-second ties: REPLACE assigns a fresh rowid, so the
    // most recent write always wins.
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE request_key = ?
         ORDER BY stored_at DESC, rowid DESC
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    row.map(row_to_snapshot).transpose()
  }

  fn list_partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM cache_entries ORDER BY partition")
      .map_err(|e| eyre!("Failed to prepare partition query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let conn = self.lock()?;

    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    Ok(deleted > 0)
  }

  fn count_entries(&self, partition: &str) -> Result<u64> {
    let conn = self.lock()?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count partition entries: {}", e))?;

    Ok(count)
  }
}

fn row_to_snapshot(row: (u16, Vec<u8>, Vec<u8>, String)) -> Result<ResponseSnapshot> {
  let (status, headers, body, stored_at) = row;

  let headers: Vec<(String, String)> =
    serde_json::from_slice(&headers).map_err(|e| eyre!("Failed to parse headers: {}", e))?;

  let stored_at = DateTime::parse_from_rfc3339(&stored_at)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse stored_at '{}': {}", stored_at, e))?;

  Ok(ResponseSnapshot {
    status,
    headers,
    body,
    stored_at,
  })
}
