//! Backend that discards everything written to it.

use serde_json::{json, Value};

use super::{metadata, Backend, Metadata, Visibility, WriteConfig, TYPE_DIR, TYPE_FILE};

/// Accepts writes and reports them as successful, but never stores
/// anything: every lookup afterwards reports the path as absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl Backend for NullBackend {
  fn write(&self, path: &str, contents: &[u8], config: &WriteConfig) -> Option<Metadata> {
    let mut meta = metadata([
      ("type", json!(TYPE_FILE)),
      ("path", json!(path)),
      ("size", json!(contents.len())),
    ]);
    if let Some(v) = config.visibility {
      meta.insert("visibility".into(), Value::from(v));
    }
    Some(meta)
  }

  fn update(&self, _path: &str, _contents: &[u8], _config: &WriteConfig) -> Option<Metadata> {
    None
  }

  fn rename(&self, _path: &str, _new_path: &str) -> bool {
    false
  }

  fn copy(&self, _path: &str, _new_path: &str) -> bool {
    false
  }

  fn delete(&self, _path: &str) -> bool {
    false
  }

  fn delete_dir(&self, _dirname: &str) -> bool {
    false
  }

  fn create_dir(&self, dirname: &str, _config: &WriteConfig) -> Option<Metadata> {
    Some(metadata([("path", json!(dirname)), ("type", json!(TYPE_DIR))]))
  }

  fn set_visibility(&self, _path: &str, visibility: Visibility) -> Option<Metadata> {
    Some(metadata([("visibility", Value::from(visibility))]))
  }

  fn has(&self, _path: &str) -> bool {
    false
  }

  fn read(&self, _path: &str) -> Option<Vec<u8>> {
    None
  }

  fn list_contents(&self, _dirname: &str, _recursive: bool) -> Option<Vec<Metadata>> {
    Some(Vec::new())
  }

  fn get_metadata(&self, _path: &str) -> Option<Metadata> {
    None
  }

  fn get_size(&self, _path: &str) -> Option<Metadata> {
    None
  }

  fn get_mimetype(&self, _path: &str) -> Option<Metadata> {
    None
  }

  fn get_timestamp(&self, _path: &str) -> Option<Metadata> {
    None
  }

  fn get_visibility(&self, _path: &str) -> Option<Metadata> {
    None
  }
}
