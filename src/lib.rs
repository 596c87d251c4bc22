//! Metadata caching for path-addressed storage backends.
//!
//! A [`CachingAdapter`] wraps any [`Backend`] and serves existence, size,
//! mimetype, timestamp and visibility lookups from a [`CacheStore`], keeping
//! the cache consistent with every mutation that goes through it.

pub mod backend;
pub mod cache;
pub mod config;
pub mod registry;

pub use backend::{Backend, Metadata, Visibility, WriteConfig};
pub use cache::{entry_key, CacheEntry, CacheStore, CachingAdapter};
pub use config::Config;
pub use registry::Registry;
