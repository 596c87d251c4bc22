//! In-process backend holding a tree of files and directories.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{metadata, Backend, Metadata, Visibility, WriteConfig, TYPE_DIR, TYPE_FILE};

#[derive(Debug, Clone)]
enum Node {
  File {
    contents: Vec<u8>,
    timestamp: i64,
    visibility: Visibility,
  },
  Dir {
    timestamp: i64,
    visibility: Visibility,
  },
}

impl Node {
  fn is_dir(&self) -> bool {
    matches!(self, Node::Dir { .. })
  }

  fn visibility_mut(&mut self) -> &mut Visibility {
    match self {
      Node::File { visibility, .. } | Node::Dir { visibility, .. } => visibility,
    }
  }

  fn metadata(&self, path: &str) -> Metadata {
    match self {
      Node::File {
        contents,
        timestamp,
        visibility,
      } => metadata([
        ("type", json!(TYPE_FILE)),
        ("path", json!(path)),
        ("timestamp", json!(timestamp)),
        ("size", json!(contents.len())),
        ("mimetype", json!(guess_mimetype(path))),
        ("visibility", Value::from(*visibility)),
      ]),
      Node::Dir {
        timestamp,
        visibility,
      } => metadata([
        ("type", json!(TYPE_DIR)),
        ("path", json!(path)),
        ("timestamp", json!(timestamp)),
        ("visibility", Value::from(*visibility)),
      ]),
    }
  }
}

/// Backend keeping everything in memory.
///
/// Parent directories are created implicitly on write. Writing below a
/// path that is a file fails, as it would on a real filesystem.
#[derive(Debug, Default)]
pub struct MemoryBackend {
  nodes: Mutex<BTreeMap<String, Node>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Node>> {
    // A panic while holding the lock cannot leave the map half-updated.
    self.nodes.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn field(&self, path: &str, key: &str) -> Option<Metadata> {
    let path = normalize(path);
    let nodes = self.nodes();
    let meta = nodes.get(&path)?.metadata(&path);
    let value = meta.get(key)?.clone();
    Some(metadata([("path", json!(path)), (key, value)]))
  }
}

impl Backend for MemoryBackend {
  fn write(&self, path: &str, contents: &[u8], config: &WriteConfig) -> Option<Metadata> {
    let path = normalize(path);
    if path.is_empty() {
      return None;
    }

    let mut nodes = self.nodes();
    if nodes.get(&path).is_some_and(Node::is_dir) || !ensure_parents(&mut nodes, &path) {
      return None;
    }

    let node = Node::File {
      contents: contents.to_vec(),
      timestamp: now(),
      visibility: config.visibility.unwrap_or_default(),
    };
    let meta = node.metadata(&path);
    nodes.insert(path, node);
    Some(meta)
  }

  fn update(&self, path: &str, contents: &[u8], config: &WriteConfig) -> Option<Metadata> {
    let path = normalize(path);
    let mut nodes = self.nodes();

    match nodes.get_mut(&path)? {
      Node::File {
        contents: current,
        timestamp,
        visibility,
      } => {
        *current = contents.to_vec();
        *timestamp = now();
        if let Some(v) = config.visibility {
          *visibility = v;
        }
      }
      Node::Dir { .. } => return None,
    }

    nodes.get(&path).map(|node| node.metadata(&path))
  }

  fn rename(&self, path: &str, new_path: &str) -> bool {
    let (path, new_path) = (normalize(path), normalize(new_path));
    if path.is_empty() || new_path.is_empty() || path == new_path || is_below(&new_path, &path) {
      return false;
    }

    let mut nodes = self.nodes();
    let Some(source_is_dir) = nodes.get(&path).map(Node::is_dir) else {
      return false;
    };
    // Files may replace files; nothing replaces a directory.
    if let Some(dest) = nodes.get(&new_path) {
      if source_is_dir || dest.is_dir() {
        return false;
      }
    }
    if !ensure_parents(&mut nodes, &new_path) {
      return false;
    }

    let moved: Vec<String> = nodes
      .keys()
      .filter(|k| **k == path || is_below(k, &path))
      .cloned()
      .collect();
    for old in moved {
      if let Some(node) = nodes.remove(&old) {
        let renamed = format!("{}{}", new_path, &old[path.len()..]);
        nodes.insert(renamed, node);
      }
    }
    true
  }

  fn copy(&self, path: &str, new_path: &str) -> bool {
    let (path, new_path) = (normalize(path), normalize(new_path));
    if new_path.is_empty() || path == new_path {
      return false;
    }

    let mut nodes = self.nodes();
    let Some(source @ Node::File { .. }) = nodes.get(&path).cloned() else {
      return false;
    };
    if nodes.get(&new_path).is_some_and(Node::is_dir) || !ensure_parents(&mut nodes, &new_path) {
      return false;
    }

    nodes.insert(new_path, source);
    true
  }

  fn delete(&self, path: &str) -> bool {
    let path = normalize(path);
    let mut nodes = self.nodes();
    match nodes.get(&path) {
      Some(Node::File { .. }) => nodes.remove(&path).is_some(),
      _ => false,
    }
  }

  fn delete_dir(&self, dirname: &str) -> bool {
    let dirname = normalize(dirname);
    let mut nodes = self.nodes();
    if dirname.is_empty() || !nodes.get(&dirname).is_some_and(Node::is_dir) {
      return false;
    }

    nodes.retain(|k, _| *k != dirname && !is_below(k, &dirname));
    true
  }

  fn create_dir(&self, dirname: &str, config: &WriteConfig) -> Option<Metadata> {
    let dirname = normalize(dirname);
    if dirname.is_empty() {
      return None;
    }

    let mut nodes = self.nodes();
    match nodes.get(&dirname) {
      Some(Node::File { .. }) => return None,
      Some(dir) => return Some(dir.metadata(&dirname)),
      None => {}
    }
    if !ensure_parents(&mut nodes, &dirname) {
      return None;
    }

    let visibility = config.visibility.unwrap_or_default();
    nodes.insert(
      dirname.clone(),
      Node::Dir {
        timestamp: now(),
        visibility,
      },
    );
    Some(metadata([
      ("path", json!(dirname)),
      ("type", json!(TYPE_DIR)),
      ("visibility", Value::from(visibility)),
    ]))
  }

  fn set_visibility(&self, path: &str, visibility: Visibility) -> Option<Metadata> {
    let path = normalize(path);
    let mut nodes = self.nodes();
    *nodes.get_mut(&path)?.visibility_mut() = visibility;
    Some(metadata([
      ("path", json!(path)),
      ("visibility", Value::from(visibility)),
    ]))
  }

  fn has(&self, path: &str) -> bool {
    let path = normalize(path);
    path.is_empty() || self.nodes().contains_key(&path)
  }

  fn read(&self, path: &str) -> Option<Vec<u8>> {
    match self.nodes().get(&normalize(path))? {
      Node::File { contents, .. } => Some(contents.clone()),
      Node::Dir { .. } => None,
    }
  }

  fn list_contents(&self, dirname: &str, recursive: bool) -> Option<Vec<Metadata>> {
    let dirname = normalize(dirname);
    let nodes = self.nodes();

    let listing = nodes
      .iter()
      .filter(|(k, _)| is_below(k, &dirname))
      .filter(|(k, _)| {
        let rest = if dirname.is_empty() {
          k.as_str()
        } else {
          &k[dirname.len() + 1..]
        };
        recursive || !rest.contains('/')
      })
      .map(|(k, node)| node.metadata(k))
      .collect();
    Some(listing)
  }

  fn get_metadata(&self, path: &str) -> Option<Metadata> {
    let path = normalize(path);
    self.nodes().get(&path).map(|node| node.metadata(&path))
  }

  fn get_size(&self, path: &str) -> Option<Metadata> {
    self.field(path, "size")
  }

  fn get_mimetype(&self, path: &str) -> Option<Metadata> {
    self.field(path, "mimetype")
  }

  fn get_timestamp(&self, path: &str) -> Option<Metadata> {
    self.field(path, "timestamp")
  }

  fn get_visibility(&self, path: &str) -> Option<Metadata> {
    self.field(path, "visibility")
  }
}

fn now() -> i64 {
  Utc::now().timestamp()
}

fn normalize(path: &str) -> String {
  path.trim_matches('/').to_string()
}

/// True if `path` lies strictly inside `dir`. Everything is below the root.
fn is_below(path: &str, dir: &str) -> bool {
  if dir.is_empty() {
    return !path.is_empty();
  }
  path.len() > dir.len() + 1 && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Create the missing ancestors of `path`. Fails without touching the tree
/// if any ancestor is a file.
fn ensure_parents(nodes: &mut BTreeMap<String, Node>, path: &str) -> bool {
  let ancestors: Vec<&str> = path
    .match_indices('/')
    .map(|(i, _)| &path[..i])
    .collect();

  if ancestors
    .iter()
    .any(|a| matches!(nodes.get(*a), Some(Node::File { .. })))
  {
    return false;
  }

  for ancestor in ancestors {
    nodes.entry(ancestor.to_string()).or_insert(Node::Dir {
      timestamp: now(),
      visibility: Visibility::Public,
    });
  }
  true
}

fn guess_mimetype(path: &str) -> &'static str {
  let ext = path.rsplit_once('.').map(|(_, e)| e.to_lowercase());
  match ext.as_deref() {
    Some("txt") => "text/plain",
    Some("html" | "htm") => "text/html",
    Some("css") => "text/css",
    Some("csv") => "text/csv",
    Some("js") => "application/javascript",
    Some("json") => "application/json",
    Some("xml") => "application/xml",
    Some("pdf") => "application/pdf",
    Some("png") => "image/png",
    Some("jpg" | "jpeg") => "image/jpeg",
    Some("gif") => "image/gif",
    Some("svg") => "image/svg+xml",
    _ => "application/octet-stream",
  }
}
