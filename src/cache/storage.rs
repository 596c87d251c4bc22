//! Cache store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::entry::CacheEntry;

/// Key/value storage for cache entries.
///
/// Keys are opaque (see [`entry_key`](super::entry_key)). Each call must be
/// atomic on its own; nothing is assumed about sequences of calls.
/// Eviction and expiry are the store's business.
pub trait CacheStore: Send + Sync {
  /// Get the entry stored under `key`.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Store `entry` under `key`, replacing whatever was there.
  fn set(&self, key: &str, entry: &CacheEntry) -> Result<()>;

  /// Remove the entry under `key`. Removing a missing key is not an error.
  fn delete(&self, key: &str) -> Result<()>;

  /// Remove several entries at once.
  fn delete_multiple(&self, keys: &[String]) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn delete_multiple(&self, _keys: &[String]) -> Result<()> {
    Ok(())
  }
}

/// A stored entry together with when it was written.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub key: String,
  pub entry: CacheEntry,
  pub cached_at: DateTime<Utc>,
}

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private, throwaway store.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("flycache").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// All stored entries, optionally restricted to one scheme, ordered by path.
  pub fn entries(&self, scheme: Option<&str>) -> Result<Vec<StoredEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT cache_key, data, cached_at FROM entry_cache
         WHERE ?1 IS NULL OR scheme = ?1
         ORDER BY scheme, path",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String)> = stmt
      .query_map(params![scheme], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    rows
      .into_iter()
      .map(|(key, data, cached_at)| {
        Ok(StoredEntry {
          key,
          entry: decode(&data)?,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }

  /// Number of stored entries.
  pub fn count(&self) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row("SELECT COUNT(*) FROM entry_cache", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;
    Ok(usize::try_from(count).unwrap_or_default())
  }

  /// Drop every entry. Returns how many were removed.
  pub fn clear(&self) -> Result<usize> {
    self
      .conn()?
      .execute("DELETE FROM entry_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per (scheme, path), addressed by the derived key
CREATE TABLE IF NOT EXISTS entry_cache (
    cache_key TEXT PRIMARY KEY,
    scheme TEXT NOT NULL,
    path TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_entry_cache_scheme
    ON entry_cache(scheme, path);
"#;

impl CacheStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.conn()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM entry_cache WHERE cache_key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    data.map(|d| decode(&d)).transpose()
  }

  fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
    let data =
      serde_json::to_vec(entry).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO entry_cache (cache_key, scheme, path, data, cached_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![key, entry.scheme(), entry.path(), data],
      )
      .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM entry_cache WHERE cache_key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;

    Ok(())
  }

  fn delete_multiple(&self, keys: &[String]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for key in keys {
      tx.execute("DELETE FROM entry_cache WHERE cache_key = ?", params![key])
        .map_err(|e| eyre!("Failed to delete entry: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

fn decode(data: &[u8]) -> Result<CacheEntry> {
  serde_json::from_slice(data).map_err(|e| eyre!("Failed to deserialize entry: {}", e))
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::metadata;
  use serde_json::json;

  fn entry(scheme: &str, path: &str, size: u64) -> CacheEntry {
    let mut entry = CacheEntry::new(scheme, path);
    entry.set_metadata(metadata([("path", json!(path)), ("size", json!(size))]));
    entry
  }

  #[test]
  fn test_set_get_delete() {
    let store = SqliteStore::open_in_memory().unwrap();
    let e = entry("public", "a.txt", 3);

    assert!(store.get(&e.key()).unwrap().is_none());
    store.set(&e.key(), &e).unwrap();
    assert_eq!(store.get(&e.key()).unwrap(), Some(e.clone()));

    store.delete(&e.key()).unwrap();
    assert!(store.get(&e.key()).unwrap().is_none());
    store.delete(&e.key()).unwrap();
  }

  #[test]
  fn test_set_replaces() {
    let store = SqliteStore::open_in_memory().unwrap();
    let old = entry("public", "a.txt", 3);
    let new = entry("public", "a.txt", 9);

    store.set(&old.key(), &old).unwrap();
    store.set(&new.key(), &new).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.get(&old.key()).unwrap(), Some(new));
  }

  #[test]
  fn test_delete_multiple_and_entries() {
    let store = SqliteStore::open_in_memory().unwrap();
    let entries = [
      entry("public", "a", 1),
      entry("public", "b", 2),
      entry("private", "a", 3),
    ];
    for e in &entries {
      store.set(&e.key(), e).unwrap();
    }

    let public = store.entries(Some("public")).unwrap();
    assert_eq!(public.len(), 2);
    assert_eq!(public[0].entry.path(), "a");
    assert_eq!(store.entries(None).unwrap().len(), 3);

    store
      .delete_multiple(&[entries[0].key(), entries[1].key()])
      .unwrap();
    assert_eq!(store.count().unwrap(), 1);
    assert!(store.get(&entries[2].key()).unwrap().is_some());
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let e = entry("public", "a.txt", 3);

    {
      let store = SqliteStore::open_at(&path).unwrap();
      store.set(&e.key(), &e).unwrap();
    }

    let store = SqliteStore::open_at(&path).unwrap();
    assert_eq!(store.get(&e.key()).unwrap(), Some(e));
    assert_eq!(store.clear().unwrap(), 1);
    assert_eq!(store.count().unwrap(), 0);
  }

  #[test]
  fn test_noop_store_always_misses() {
    let store = NoopStore;
    let e = entry("public", "a.txt", 3);
    store.set(&e.key(), &e).unwrap();
    assert!(store.get(&e.key()).unwrap().is_none());
  }
}
