//! Cache partition management.
//!
//! A partition is a named, independently lifecycle-managed key-value store of
//! response snapshots. [`PartitionManager`] layers the worker's rules on top
//! of a [`PartitionStore`] backend: lookups never error, only GET responses
//! are ever cached, and activation reclaims everything outside the current
//! version's keep set.

mod names;
mod store;

pub use names::PartitionNames;
pub use store::{PartitionStore, SqliteStore};

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::request::{Method, Request, ResponseSnapshot};

pub struct PartitionManager<S: PartitionStore> {
  store: Arc<S>,
  names: PartitionNames,
}

impl<S: PartitionStore> PartitionManager<S> {
  pub fn new(store: Arc<S>, names: PartitionNames) -> Self {
    Self { store, names }
  }

  pub fn names(&self) -> &PartitionNames {
    &self.names
  }

  /// Look up the most recent snapshot for this request across all partitions.
  /// Storage failures are logged and reported as a miss, never an error.
  pub fn lookup(&self, request: &Request) -> Option<ResponseSnapshot> {
    match self.store.get_any(&request.cache_key()) {
      Ok(found) => found,
      Err(e) => {
        warn!("cache lookup for {} failed: {e:#}", request.url);
        None
      }
    }
  }

  /// Look up within a single partition. Same never-error contract as `lookup`.
  pub fn lookup_in(&self, partition: &str, request: &Request) -> Option<ResponseSnapshot> {
    match self.store.get(partition, &request.cache_key()) {
      Ok(found) => found,
      Err(e) => {
        warn!("cache lookup for {} failed: {e:#}", request.url);
        None
      }
    }
  }

  /// Store a snapshot for a request. The key space is GET-only.
  pub fn store(
    &self,
    partition: &str,
    request: &Request,
    snapshot: &ResponseSnapshot,
  ) -> Result<()> {
    if request.method != Method::GET {
      return Err(eyre!(
        "Refusing to cache non-GET request {} {}",
        request.method,
        request.url
      ));
    }

    self.store.put(partition, &request.cache_key(), snapshot)
  }

  /// Store a batch of snapshots in one commit. A failure on any entry leaves
  /// the partition untouched. Same GET-only key space as `store`.
  pub fn store_batch(
    &self,
    partition: &str,
    entries: &[(Request, ResponseSnapshot)],
  ) -> Result<()> {
    let mut rows = Vec::with_capacity(entries.len());

    for (request, snapshot) in entries {
      if request.method != Method::GET {
        return Err(eyre!(
          "Refusing to cache non-GET request {} {}",
          request.method,
          request.url
        ));
      }
      rows.push((request.cache_key(), snapshot.clone()));
    }

    self.store.put_all(partition, &rows)
  }

  /// Delete every partition not in `keep`. A failure to delete one partition
  /// is logged and does not abort reclamation of the others. Idempotent.
  pub fn reclaim(&self, keep: &[&str]) -> Result<usize> {
    let mut deleted = 0;

    for partition in self.store.list_partitions()? {
      if keep.contains(&partition.as_str()) {
        continue;
      }
      match self.store.delete_partition(&partition) {
        Ok(true) => {
          info!("deleted stale cache partition {partition}");
          deleted += 1;
        }
        Ok(false) => {}
        Err(e) => warn!("failed to delete cache partition {partition}: {e:#}"),
      }
    }

    Ok(deleted)
  }

  /// All partition names currently holding entries.
  pub fn partitions(&self) -> Result<Vec<String>> {
    self.store.list_partitions()
  }

  /// Entry count for one partition.
  pub fn entry_count(&self, partition: &str) -> Result<u64> {
    self.store.count_entries(partition)
  }
}

impl<S: PartitionStore> Clone for PartitionManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      names: self.names.clone(),
    }
  }
}
