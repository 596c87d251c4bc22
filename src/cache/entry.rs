//! The cached record for one (scheme, path).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{Metadata, Visibility};

use super::key::entry_key;

/// Metadata keys that describe content rather than the path and are never
/// kept in the cache.
const CONTENT_KEYS: [&str; 2] = ["contents", "stream"];

/// Everything cached about one path.
///
/// An entry is a plain value: loading, saving and deleting it is done by
/// whoever holds the store.
///
/// Visibility lives in the dedicated `visibility` field. When a metadata bag
/// is present its `visibility` key is kept equal to that field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  scheme: String,
  path: String,
  metadata: Option<Metadata>,
  /// The bag came from a full-metadata source rather than single-field lookups
  #[serde(default)]
  complete: bool,
  visibility: Option<Visibility>,
}

impl CacheEntry {
  /// An empty shell: exists, but knows nothing about the path yet.
  pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      scheme: scheme.into(),
      path: path.into(),
      metadata: None,
      complete: false,
      visibility: None,
    }
  }

  pub fn scheme(&self) -> &str {
    &self.scheme
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  /// The cache-store key this entry lives under.
  pub fn key(&self) -> String {
    entry_key(&self.scheme, &self.path)
  }

  /// The metadata bag, if one is cached. An empty bag counts as absent.
  pub fn metadata(&self) -> Option<&Metadata> {
    self.metadata.as_ref().filter(|m| !m.is_empty())
  }

  /// The metadata bag, only if it was filled from a full-metadata source.
  pub fn full_metadata(&self) -> Option<&Metadata> {
    self.metadata().filter(|_| self.complete)
  }

  /// Whether the cached bag holds `field`.
  pub fn has_field(&self, field: &str) -> bool {
    self.metadata().is_some_and(|m| m.contains_key(field))
  }

  /// Replace the bag with a full metadata result.
  pub fn set_metadata(&mut self, metadata: Metadata) {
    self.metadata = Some(strip_content(metadata));
    self.complete = true;
    // A full result supersedes any visibility recorded earlier.
    self.visibility = None;
    self.sync_visibility_from_metadata();
  }

  /// Overlay a partial result (e.g. just `size`) onto the bag.
  pub fn merge_metadata(&mut self, partial: Metadata) {
    let bag = self.metadata.get_or_insert_with(Metadata::new);
    bag.extend(strip_content(partial));
    self.sync_visibility_from_metadata();
  }

  pub fn visibility(&self) -> Option<Visibility> {
    self.visibility.or_else(|| {
      self
        .metadata()
        .and_then(|m| m.get("visibility"))
        .and_then(Visibility::from_value)
    })
  }

  pub fn set_visibility(&mut self, visibility: Visibility) {
    self.visibility = Some(visibility);
    if let Some(bag) = self.metadata.as_mut().filter(|m| !m.is_empty()) {
      bag.insert("visibility".into(), Value::from(visibility));
    }
  }

  /// Move the entry to `new_path`, patching `metadata.path` when a bag is
  /// cached. The caller is responsible for re-keying it in the store.
  pub fn rename(&mut self, new_path: impl Into<String>) {
    self.path = new_path.into();
    if let Some(bag) = self.metadata.as_mut().filter(|m| !m.is_empty()) {
      bag.insert("path".into(), Value::String(self.path.clone()));
    }
  }

  /// The `type` recorded in the bag, if any.
  pub fn kind(&self) -> Option<&str> {
    self.metadata()?.get("type")?.as_str()
  }

  fn sync_visibility_from_metadata(&mut self) {
    let from_bag = self
      .metadata
      .as_ref()
      .and_then(|m| m.get("visibility"))
      .and_then(Visibility::from_value);
    if let Some(v) = from_bag {
      self.visibility = Some(v);
    }
  }
}

fn strip_content(mut metadata: Metadata) -> Metadata {
  for key in CONTENT_KEYS {
    metadata.remove(key);
  }
  metadata
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::metadata;
  use serde_json::json;

  fn full() -> Metadata {
    metadata([
      ("type", json!("file")),
      ("path", json!("a.txt")),
      ("size", json!(4)),
      ("contents", json!("test")),
    ])
  }

  #[test]
  fn test_empty_bag_is_a_miss() {
    let mut entry = CacheEntry::new("public", "a.txt");
    assert!(entry.metadata().is_none());

    entry.set_metadata(Metadata::new());
    assert!(entry.metadata().is_none());
    assert!(entry.full_metadata().is_none());
  }

  #[test]
  fn test_contents_are_never_cached() {
    let mut entry = CacheEntry::new("public", "a.txt");
    entry.set_metadata(full());

    let bag = entry.full_metadata().unwrap();
    assert!(!bag.contains_key("contents"));
    assert_eq!(bag["size"], json!(4));
  }

  #[test]
  fn test_partial_merge_is_not_full_metadata() {
    let mut entry = CacheEntry::new("public", "a.txt");
    entry.merge_metadata(metadata([("size", json!(10))]));

    assert!(entry.has_field("size"));
    assert!(!entry.has_field("mimetype"));
    assert!(entry.full_metadata().is_none());

    entry.set_metadata(full());
    entry.merge_metadata(metadata([("size", json!(11))]));
    assert_eq!(entry.full_metadata().unwrap()["size"], json!(11));
  }

  #[test]
  fn test_visibility_kept_in_sync() {
    let mut entry = CacheEntry::new("public", "a.txt");
    entry.set_visibility(Visibility::Private);
    assert_eq!(entry.visibility(), Some(Visibility::Private));
    assert!(entry.metadata().is_none());

    entry.set_metadata(full());
    entry.set_visibility(Visibility::Public);
    assert_eq!(entry.metadata().unwrap()["visibility"], json!("public"));

    entry.merge_metadata(metadata([("visibility", json!("private"))]));
    assert_eq!(entry.visibility(), Some(Visibility::Private));
  }

  #[test]
  fn test_rename_patches_path() {
    let mut entry = CacheEntry::new("public", "a.txt");
    entry.rename("b.txt");
    assert_eq!(entry.path(), "b.txt");
    assert!(entry.metadata().is_none());

    entry.set_metadata(full());
    entry.rename("c.txt");
    assert_eq!(entry.metadata().unwrap()["path"], json!("c.txt"));
    assert_eq!(entry.key(), entry_key("public", "c.txt"));
  }
}
