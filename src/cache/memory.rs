//! In-process cache store backed by Moka.

use color_eyre::Result;
use moka::sync::Cache;
use std::time::Duration;
use tracing::debug;

use super::entry::CacheEntry;
use super::storage::CacheStore;

/// Bounded, optionally expiring in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
  entries: Cache<String, CacheEntry>,
}

impl MemoryStore {
  /// Default upper bound on cached entries.
  pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

  /// Create a store with the default capacity and no expiry.
  pub fn new() -> Self {
    Self::with_limits(Self::DEFAULT_MAX_ENTRIES, None)
  }

  /// Create a store holding at most `max_entries`, each living at most `ttl`.
  pub fn with_limits(max_entries: u64, ttl: Option<Duration>) -> Self {
    let mut builder = Cache::builder()
      .max_capacity(max_entries)
      .name("metadata_entry_cache");
    if let Some(ttl) = ttl {
      builder = builder.time_to_live(ttl);
    }

    Self {
      entries: builder.build(),
    }
  }

  /// Approximate number of live entries.
  pub fn entry_count(&self) -> u64 {
    self.entries.run_pending_tasks();
    self.entries.entry_count()
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    Ok(self.entries.get(key))
  }

  fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
    self.entries.insert(key.to_string(), entry.clone());
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.entries.invalidate(key);
    Ok(())
  }

  fn delete_multiple(&self, keys: &[String]) -> Result<()> {
    for key in keys {
      self.entries.invalidate(key);
    }
    debug!(count = keys.len(), "Invalidated cache entries");
    Ok(())
  }
}
