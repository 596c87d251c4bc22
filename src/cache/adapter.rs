//! Backend decorator that caches metadata.

use serde_json::{json, Value};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::backend::{metadata, Backend, Metadata, Visibility, WriteConfig, TYPE_FILE};

use super::entry::CacheEntry;
use super::key::entry_key;
use super::storage::CacheStore;

/// A [`Backend`] that answers metadata lookups from a [`CacheStore`].
///
/// The wrapped backend stays the source of truth. Mutations go to it first
/// and the cache is only touched once it reports success, so a cached entry
/// either matches the backend or does not exist. Content reads and directory
/// listings are never cached.
///
/// Store failures are logged and otherwise ignored: a failed read is a
/// miss, a failed write leaves the entry as it was.
pub struct CachingAdapter<B, S: ?Sized> {
  scheme: String,
  backend: B,
  store: Arc<S>,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl<B, S: ?Sized> CachingAdapter<B, S> {
  /// Returns (hits, misses, hit_rate)
  pub fn stats(&self) -> (u64, u64, f64) {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total = hits + misses;
    let hit_rate = if total > 0 {
      (hits as f64 / total as f64) * 100.0
    } else {
      0.0
    };
    (hits, misses, hit_rate)
  }

  /// Log current cache metrics
  pub fn log_metrics(&self) {
    let (hits, misses, hit_rate) = self.stats();
    debug!(
      scheme = %self.scheme,
      hits = hits,
      misses = misses,
      hit_rate = format!("{:.1}%", hit_rate),
      "Cache metrics"
    );
  }
}

impl<B, S: ?Sized> Drop for CachingAdapter<B, S> {
  fn drop(&mut self) {
    self.log_metrics();
  }
}

impl<B: Backend, S: CacheStore + ?Sized> CachingAdapter<B, S> {
  /// Wrap `backend`, caching entries for `scheme` in `store`.
  pub fn new(scheme: impl Into<String>, backend: B, store: Arc<S>) -> Self {
    Self {
      scheme: scheme.into(),
      backend,
      store,
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  pub fn scheme(&self) -> &str {
    &self.scheme
  }

  /// The wrapped backend. Calls made through it bypass the cache.
  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// The entry currently cached for `path`, if any.
  pub fn cached(&self, path: &str) -> Option<CacheEntry> {
    self.lookup(path)
  }

  fn key(&self, path: &str) -> String {
    entry_key(&self.scheme, path)
  }

  fn hit(&self, path: &str, op: &'static str) {
    self.hits.fetch_add(1, Ordering::Relaxed);
    trace!(scheme = %self.scheme, path = path, op = op, "Cache HIT");
  }

  fn miss(&self, path: &str, op: &'static str) {
    self.misses.fetch_add(1, Ordering::Relaxed);
    trace!(scheme = %self.scheme, path = path, op = op, "Cache MISS");
  }

  fn lookup(&self, path: &str) -> Option<CacheEntry> {
    match self.store.get(&self.key(path)) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(scheme = %self.scheme, path = path, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// The cached entry for `path`, or an empty shell.
  fn load(&self, path: &str) -> CacheEntry {
    self
      .lookup(path)
      .unwrap_or_else(|| CacheEntry::new(self.scheme.as_str(), path))
  }

  fn save(&self, entry: &CacheEntry) {
    match self.store.set(&entry.key(), entry) {
      Ok(()) => debug!(scheme = %self.scheme, path = entry.path(), "Cached entry"),
      Err(e) => {
        warn!(scheme = %self.scheme, path = entry.path(), error = %e, "Cache write failed")
      }
    }
  }

  fn forget(&self, path: &str) {
    match self.store.delete(&self.key(path)) {
      Ok(()) => debug!(scheme = %self.scheme, path = path, "Invalidated entry"),
      Err(e) => {
        warn!(scheme = %self.scheme, path = path, error = %e, "Cache invalidation failed")
      }
    }
  }

  fn forget_all(&self, paths: &[String]) {
    let keys: Vec<String> = paths.iter().map(|p| self.key(p)).collect();
    match self.store.delete_multiple(&keys) {
      Ok(()) => debug!(scheme = %self.scheme, count = keys.len(), "Invalidated entries"),
      Err(e) => {
        warn!(scheme = %self.scheme, count = keys.len(), error = %e, "Cache invalidation failed")
      }
    }
  }

  /// Record the full metadata a write reported.
  fn remember(&self, path: &str, metadata: &Metadata) {
    let mut entry = self.load(path);
    entry.set_metadata(metadata.clone());
    self.save(&entry);
  }

  /// Drop whatever is cached for `path` and fetch it fresh.
  fn refresh(&self, path: &str) -> Option<Metadata> {
    self.forget(path);
    let metadata = self.backend.get_metadata(path)?;
    let mut entry = CacheEntry::new(self.scheme.as_str(), path);
    entry.set_metadata(metadata.clone());
    self.save(&entry);
    Some(metadata)
  }

  /// Paths below `path`, as the backend reports them. `None` if the
  /// listing failed.
  fn children(&self, path: &str) -> Option<Vec<String>> {
    let listing = self.backend.list_contents(path, true)?;
    Some(
      listing
        .iter()
        .filter_map(entry_path)
        .map(String::from)
        .collect(),
    )
  }

  /// Serve a bag holding `field` from the cache, or fetch that field and
  /// merge it into the entry.
  fn cached_field<F>(&self, path: &str, field: &'static str, fetch: F) -> Option<Metadata>
  where
    F: FnOnce(&B, &str) -> Option<Metadata>,
  {
    let cached = self.lookup(path);
    if let Some(bag) = cached
      .as_ref()
      .filter(|e| e.has_field(field))
      .and_then(CacheEntry::metadata)
    {
      self.hit(path, field);
      return Some(bag.clone());
    }
    self.miss(path, field);

    let result = fetch(&self.backend, path)?;
    let mut entry = cached.unwrap_or_else(|| CacheEntry::new(self.scheme.as_str(), path));
    entry.merge_metadata(result.clone());
    self.save(&entry);
    Some(result)
  }
}

fn entry_path(metadata: &Metadata) -> Option<&str> {
  metadata.get("path").and_then(Value::as_str)
}

impl<B: Backend, S: CacheStore + ?Sized> Backend for CachingAdapter<B, S> {
  fn write(&self, path: &str, contents: &[u8], config: &WriteConfig) -> Option<Metadata> {
    let metadata = self.backend.write(path, contents, config)?;
    self.remember(path, &metadata);
    Some(metadata)
  }

  fn write_stream(
    &self,
    path: &str,
    stream: &mut dyn Read,
    config: &WriteConfig,
  ) -> Option<Metadata> {
    let metadata = self.backend.write_stream(path, stream, config)?;
    self.remember(path, &metadata);
    Some(metadata)
  }

  fn update(&self, path: &str, contents: &[u8], config: &WriteConfig) -> Option<Metadata> {
    let metadata = self.backend.update(path, contents, config)?;
    self.remember(path, &metadata);
    Some(metadata)
  }

  fn update_stream(
    &self,
    path: &str,
    stream: &mut dyn Read,
    config: &WriteConfig,
  ) -> Option<Metadata> {
    let metadata = self.backend.update_stream(path, stream, config)?;
    self.remember(path, &metadata);
    Some(metadata)
  }

  fn rename(&self, path: &str, new_path: &str) -> bool {
    let mut entry = self.load(path);

    // A directory's children have to be known before they move.
    let children = if entry.kind() == Some(TYPE_FILE) {
      Vec::new()
    } else {
      match self.children(path) {
        Some(children) => children,
        None => {
          debug!(scheme = %self.scheme, path = path, "Listing failed, not renaming");
          return false;
        }
      }
    };

    if !self.backend.rename(path, new_path) {
      return false;
    }

    entry.rename(new_path);
    self.save(&entry);
    self.forget(path);
    if !children.is_empty() {
      self.forget_all(&children);
    }
    true
  }

  fn copy(&self, path: &str, new_path: &str) -> bool {
    if !self.backend.copy(path, new_path) {
      return false;
    }

    // The destination may hold a previous occupant's entry.
    self.refresh(new_path);
    true
  }

  fn delete(&self, path: &str) -> bool {
    if !self.backend.delete(path) {
      return false;
    }

    self.forget(path);
    true
  }

  fn delete_dir(&self, dirname: &str) -> bool {
    // Once the tree is gone the backend can no longer say what was in it.
    let Some(mut paths) = self.children(dirname) else {
      debug!(scheme = %self.scheme, path = dirname, "Listing failed, not deleting directory");
      return false;
    };

    if !self.backend.delete_dir(dirname) {
      return false;
    }

    paths.push(dirname.to_string());
    self.forget_all(&paths);
    true
  }

  fn create_dir(&self, dirname: &str, config: &WriteConfig) -> Option<Metadata> {
    let result = self.backend.create_dir(dirname, config)?;
    self.refresh(dirname);
    Some(result)
  }

  fn set_visibility(&self, path: &str, visibility: Visibility) -> Option<Metadata> {
    let result = self.backend.set_visibility(path, visibility)?;
    let mut entry = self.load(path);
    entry.set_visibility(visibility);
    self.save(&entry);
    Some(result)
  }

  fn has(&self, path: &str) -> bool {
    if self.lookup(path).is_some() {
      self.hit(path, "has");
      return true;
    }
    self.miss(path, "has");

    // Always check the backend for new files; a bare existence check
    // doesn't populate the cache.
    self.backend.has(path)
  }

  fn read(&self, path: &str) -> Option<Vec<u8>> {
    self.backend.read(path)
  }

  fn read_stream(&self, path: &str) -> Option<Box<dyn Read + Send>> {
    self.backend.read_stream(path)
  }

  fn list_contents(&self, dirname: &str, recursive: bool) -> Option<Vec<Metadata>> {
    // Don't cache directory listings to avoid having to keep track of
    // incomplete cache entries.
    self.backend.list_contents(dirname, recursive)
  }

  fn get_metadata(&self, path: &str) -> Option<Metadata> {
    let cached = self.lookup(path);
    if let Some(metadata) = cached.as_ref().and_then(CacheEntry::full_metadata) {
      self.hit(path, "metadata");
      return Some(metadata.clone());
    }
    self.miss(path, "metadata");

    let metadata = self.backend.get_metadata(path)?;
    let mut entry = cached.unwrap_or_else(|| CacheEntry::new(self.scheme.as_str(), path));
    entry.set_metadata(metadata.clone());
    self.save(&entry);
    Some(metadata)
  }

  fn get_size(&self, path: &str) -> Option<Metadata> {
    self.cached_field(path, "size", |backend, path| backend.get_size(path))
  }

  fn get_mimetype(&self, path: &str) -> Option<Metadata> {
    self.cached_field(path, "mimetype", |backend, path| backend.get_mimetype(path))
  }

  fn get_timestamp(&self, path: &str) -> Option<Metadata> {
    self.cached_field(path, "timestamp", |backend, path| backend.get_timestamp(path))
  }

  fn get_visibility(&self, path: &str) -> Option<Metadata> {
    let cached = self.lookup(path);
    if let Some(entry) = &cached {
      if let Some(visibility) = entry.visibility() {
        self.hit(path, "visibility");
        return Some(match entry.metadata() {
          Some(bag) if bag.contains_key("visibility") => bag.clone(),
          _ => metadata([("path", json!(path)), ("visibility", Value::from(visibility))]),
        });
      }
    }
    self.miss(path, "visibility");

    let result = self.backend.get_visibility(path)?;
    let mut entry = cached.unwrap_or_else(|| CacheEntry::new(self.scheme.as_str(), path));
    entry.merge_metadata(result.clone());
    self.save(&entry);
    Some(result)
  }
}
