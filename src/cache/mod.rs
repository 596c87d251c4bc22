//! Metadata cache for storage backends.
//!
//! This module provides:
//! - `CacheEntry`, the cached record for one (scheme, path)
//! - `entry_key`, deriving the store key for an entry
//! - `CacheStore` and its implementations (no-op, in-memory, SQLite)
//! - `CachingAdapter`, a `Backend` that serves metadata from the cache and
//!   keeps it consistent across mutations

mod adapter;
mod entry;
mod key;
mod memory;
mod storage;

pub use adapter::CachingAdapter;
pub use entry::CacheEntry;
pub use key::entry_key;
pub use memory::MemoryStore;
pub use storage::{CacheStore, NoopStore, SqliteStore, StoredEntry};
