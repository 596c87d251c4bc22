use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use flycache::cache::SqliteStore;
use flycache::config::{Config, LogConfig, StoreKind};
use flycache::{entry_key, CacheStore};

#[derive(Parser, Debug)]
#[command(name = "flycache")]
#[command(about = "Inspect and maintain a flycache metadata store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/flycache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// SQLite database to use instead of the configured store
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print the cache key for a path
  Key { scheme: String, path: String },
  /// Show the cached entry for a path
  Show { scheme: String, path: String },
  /// List cached entries
  List {
    /// Only entries of this scheme
    #[arg(short, long)]
    scheme: Option<String>,
  },
  /// Drop cached entries
  Evict {
    scheme: String,
    #[arg(required = true)]
    paths: Vec<String>,
  },
  /// Drop every cached entry
  Clear,
  /// List configured schemes
  Schemes,
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override the store if a database is given on the command line
  if let Some(db) = args.db {
    config.store.kind = StoreKind::Sqlite;
    config.store.path = Some(db);
    config.validate()?;
  }

  let _guard = init_logging(&config.log)?;

  run(args.command, &config)
}

fn run(command: Command, config: &Config) -> Result<()> {
  match command {
    Command::Key { scheme, path } => {
      println!("{}", entry_key(&scheme, &path));
    }
    Command::Show { scheme, path } => {
      let store = config.store.open()?;
      match store.get(&entry_key(&scheme, &path))? {
        Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
        None => return Err(eyre!("Nothing cached for {}://{}", scheme, path)),
      }
    }
    Command::List { scheme } => {
      let store = sqlite_only(config, "list")?;
      for stored in store.entries(scheme.as_deref())? {
        let entry = &stored.entry;
        println!(
          "{}  {}://{}  {}",
          stored.cached_at.format("%Y-%m-%d %H:%M:%S"),
          entry.scheme(),
          entry.path(),
          entry.kind().unwrap_or("-"),
        );
      }
    }
    Command::Evict { scheme, paths } => {
      let store = config.store.open()?;
      let keys: Vec<String> = paths.iter().map(|p| entry_key(&scheme, p)).collect();
      store.delete_multiple(&keys)?;
      info!(scheme = %scheme, count = keys.len(), "Evicted entries");
    }
    Command::Clear => {
      let removed = sqlite_only(config, "clear")?.clear()?;
      println!("Removed {} entries", removed);
    }
    Command::Schemes => {
      for (name, settings) in &config.schemes {
        let cache = if settings.cache { "cached" } else { "uncached" };
        println!("{}  {:?}  {}", name, settings.driver, cache);
      }
    }
  }

  Ok(())
}

fn sqlite_only(config: &Config, command: &str) -> Result<SqliteStore> {
  if config.store.kind != StoreKind::Sqlite {
    return Err(eyre!("`{}` needs the sqlite store", command));
  }
  config.store.open_sqlite()
}

/// Set up tracing. Logs go to stderr unless a file is configured; the
/// returned guard must be held until exit so buffered lines are flushed.
fn init_logging(log: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(log.level.as_deref().unwrap_or("warn")));

  let Some(path) = &log.file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

  let appender = tracing_appender::rolling::never(dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}
