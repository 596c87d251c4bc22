//! The uniform storage operation set and the reference backends.
//!
//! Every storage technology is reachable through [`Backend`]. Expected
//! failures (missing file, permission denied, bad destination) are reported as
//! `None` / `false` rather than errors, so a caller can treat any backend,
//! cached or not, the same way.

mod memory;
mod null;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{Cursor, Read};

pub use memory::MemoryBackend;
pub use null::NullBackend;

/// Descriptive fields about a path: `type`, `path`, `size`, `mimetype`,
/// `timestamp`, `visibility`, plus whatever a backend adds.
pub type Metadata = Map<String, Value>;

/// Access level of a file or directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
  #[default]
  Public,
  Private,
}

impl Visibility {
  pub fn as_str(self) -> &'static str {
    match self {
      Visibility::Public => "public",
      Visibility::Private => "private",
    }
  }

  /// Read a visibility out of a metadata value.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value.as_str()? {
      "public" => Some(Visibility::Public),
      "private" => Some(Visibility::Private),
      _ => None,
    }
  }
}

impl From<Visibility> for Value {
  fn from(visibility: Visibility) -> Self {
    Value::String(visibility.as_str().to_string())
  }
}

/// Options passed along with writes and directory creation.
#[derive(Debug, Clone, Default)]
pub struct WriteConfig {
  /// Visibility to apply to the new file, backend default if unset
  pub visibility: Option<Visibility>,
}

impl WriteConfig {
  pub fn with_visibility(visibility: Visibility) -> Self {
    Self {
      visibility: Some(visibility),
    }
  }
}

/// Path-addressed storage.
pub trait Backend: Send + Sync {
  /// Write a new file. Returns the file's metadata.
  fn write(&self, path: &str, contents: &[u8], config: &WriteConfig) -> Option<Metadata>;

  /// Write a new file from a stream.
  fn write_stream(
    &self,
    path: &str,
    stream: &mut dyn Read,
    config: &WriteConfig,
  ) -> Option<Metadata> {
    let contents = drain(stream)?;
    self.write(path, &contents, config)
  }

  /// Replace the contents of an existing file.
  fn update(&self, path: &str, contents: &[u8], config: &WriteConfig) -> Option<Metadata>;

  /// Replace the contents of an existing file from a stream.
  fn update_stream(
    &self,
    path: &str,
    stream: &mut dyn Read,
    config: &WriteConfig,
  ) -> Option<Metadata> {
    let contents = drain(stream)?;
    self.update(path, &contents, config)
  }

  fn rename(&self, path: &str, new_path: &str) -> bool;

  fn copy(&self, path: &str, new_path: &str) -> bool;

  fn delete(&self, path: &str) -> bool;

  /// Delete a directory and everything below it.
  fn delete_dir(&self, dirname: &str) -> bool;

  fn create_dir(&self, dirname: &str, config: &WriteConfig) -> Option<Metadata>;

  fn set_visibility(&self, path: &str, visibility: Visibility) -> Option<Metadata>;

  fn has(&self, path: &str) -> bool;

  fn read(&self, path: &str) -> Option<Vec<u8>>;

  fn read_stream(&self, path: &str) -> Option<Box<dyn Read + Send>> {
    let contents = self.read(path)?;
    Some(Box::new(Cursor::new(contents)))
  }

  /// List the entries of a directory. Each entry carries at least `path`
  /// and `type`. `None` means the listing itself could not be produced.
  fn list_contents(&self, dirname: &str, recursive: bool) -> Option<Vec<Metadata>>;

  fn get_metadata(&self, path: &str) -> Option<Metadata>;

  fn get_size(&self, path: &str) -> Option<Metadata>;

  fn get_mimetype(&self, path: &str) -> Option<Metadata>;

  fn get_timestamp(&self, path: &str) -> Option<Metadata>;

  fn get_visibility(&self, path: &str) -> Option<Metadata>;
}

fn drain(stream: &mut dyn Read) -> Option<Vec<u8>> {
  let mut contents = Vec::new();
  stream.read_to_end(&mut contents).ok()?;
  Some(contents)
}

/// Metadata value of `type` for files.
pub const TYPE_FILE: &str = "file";
/// Metadata value of `type` for directories.
pub const TYPE_DIR: &str = "dir";

/// Build a metadata bag from key/value pairs.
pub fn metadata<I, K>(fields: I) -> Metadata
where
  I: IntoIterator<Item = (K, Value)>,
  K: Into<String>,
{
  fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_visibility_round_trips_through_value() {
    let value: Value = Visibility::Private.into();
    assert_eq!(value, json!("private"));
    assert_eq!(Visibility::from_value(&value), Some(Visibility::Private));
    assert_eq!(Visibility::from_value(&json!("hidden")), None);
  }

  #[test]
  fn test_default_stream_methods_buffer_into_write() {
    let backend = MemoryBackend::new();
    let mut stream = Cursor::new(b"streamed".to_vec());

    let meta = backend
      .write_stream("s.txt", &mut stream, &WriteConfig::default())
      .unwrap();
    assert_eq!(meta["size"], json!(8));

    let mut out = String::new();
    backend
      .read_stream("s.txt")
      .unwrap()
      .read_to_string(&mut out)
      .unwrap();
    assert_eq!(out, "streamed");
  }
}
