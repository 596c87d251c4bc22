use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, MemoryStore, NoopStore, SqliteStore};
use crate::registry::{Driver, SchemeSettings};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub store: StoreConfig,
  /// Backends by scheme name
  #[serde(default)]
  pub schemes: BTreeMap<String, SchemeSettings>,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
  /// Persistent store in a SQLite database
  #[default]
  Sqlite,
  /// Process-local store, lost on exit
  Memory,
  /// Caching disabled
  None,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  #[serde(default)]
  pub kind: StoreKind,
  /// Database file for the sqlite store (defaults to the data directory)
  pub path: Option<PathBuf>,
  /// Capacity of the memory store
  pub max_entries: Option<u64>,
  /// Lifetime of memory store entries, in seconds
  pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Filter used when RUST_LOG is unset (e.g. "info", "flycache=debug")
  pub level: Option<String>,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./flycache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/flycache/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("flycache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("flycache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Self = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Cached entries must not outlive the data they describe: a backend that
  /// loses its contents on exit can't be cached in the persistent store.
  pub fn validate(&self) -> Result<()> {
    if self.store.kind != StoreKind::Sqlite {
      return Ok(());
    }

    for (scheme, settings) in &self.schemes {
      if settings.cache && settings.driver.is_volatile() {
        return Err(eyre!(
          "Scheme `{}` caches a {:?} backend in the sqlite store; use the memory or none store",
          scheme,
          settings.driver
        ));
      }
    }
    Ok(())
  }
}

impl StoreConfig {
  pub fn ttl(&self) -> Option<Duration> {
    self.ttl_secs.map(Duration::from_secs)
  }

  /// Open the configured SQLite store.
  pub fn open_sqlite(&self) -> Result<SqliteStore> {
    match &self.path {
      Some(path) => SqliteStore::open_at(path),
      None => SqliteStore::open(),
    }
  }

  /// Open whichever store is configured.
  pub fn open(&self) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match self.kind {
      StoreKind::Sqlite => Arc::new(self.open_sqlite()?),
      StoreKind::Memory => Arc::new(MemoryStore::with_limits(
        self.max_entries.unwrap_or(MemoryStore::DEFAULT_MAX_ENTRIES),
        self.ttl(),
      )),
      StoreKind::None => Arc::new(NoopStore),
    };
    Ok(store)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{entry_key, CacheEntry};

  const SAMPLE: &str = r#"
store:
  kind: memory
  max_entries: 500
  ttl_secs: 60
schemes:
  public:
    driver: memory
    cache: true
  void:
    driver: "null"
log:
  level: debug
"#;

  #[test]
  fn test_parse_sample() {
    let config = Config::parse(SAMPLE).unwrap();

    assert_eq!(config.store.kind, StoreKind::Memory);
    assert_eq!(config.store.max_entries, Some(500));
    assert_eq!(config.store.ttl(), Some(Duration::from_secs(60)));
    assert!(config.schemes["public"].cache);
    assert_eq!(config.schemes["void"].driver, Driver::Null);
    assert!(!config.schemes["void"].cache);
    assert_eq!(config.log.level.as_deref(), Some("debug"));
  }

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.store.kind, StoreKind::Sqlite);
    assert!(config.schemes.is_empty());
    assert!(config.log.file.is_none());
  }

  #[test]
  fn test_unknown_driver_is_rejected() {
    assert!(Config::parse("schemes:\n  x:\n    driver: ftp\n").is_err());
  }

  #[test]
  fn test_volatile_backend_cannot_use_sqlite_store() {
    let cached_memory = "schemes:\n  public:\n    driver: memory\n    cache: true\n";
    assert!(Config::parse(cached_memory).is_err());
    assert!(Config::parse(&format!("store:\n  kind: sqlite\n{}", cached_memory)).is_err());

    for kind in ["memory", "none"] {
      let config = Config::parse(&format!("store:\n  kind: {}\n{}", kind, cached_memory)).unwrap();
      assert!(config.schemes["public"].cache);
    }

    // Uncached schemes never touch the store
    assert!(Config::parse("schemes:\n  public:\n    driver: memory\n").is_ok());

    // Switching to sqlite after loading is caught too
    let mut config = Config::parse(SAMPLE).unwrap();
    config.store.kind = StoreKind::Sqlite;
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_load_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flycache.yaml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.schemes.len(), 2);

    assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
  }

  #[test]
  fn test_open_stores() {
    let dir = tempfile::tempdir().unwrap();
    let entry = CacheEntry::new("public", "a.txt");
    let key = entry_key("public", "a.txt");

    let sqlite = StoreConfig {
      kind: StoreKind::Sqlite,
      path: Some(dir.path().join("cache.db")),
      ..Default::default()
    }
    .open()
    .unwrap();
    sqlite.set(&key, &entry).unwrap();
    assert!(sqlite.get(&key).unwrap().is_some());

    let noop = StoreConfig {
      kind: StoreKind::None,
      ..Default::default()
    }
    .open()
    .unwrap();
    noop.set(&key, &entry).unwrap();
    assert!(noop.get(&key).unwrap().is_none());
  }
}
