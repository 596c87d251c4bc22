//! Scheme → backend lookup.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::backend::{Backend, MemoryBackend, NullBackend};
use crate::cache::{CacheStore, CachingAdapter};

/// Which backend a scheme is served by.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
  #[default]
  Memory,
  Null,
}

impl Driver {
  /// Whether the backend's contents are lost when the process exits.
  pub fn is_volatile(&self) -> bool {
    match self {
      Driver::Memory | Driver::Null => true,
    }
  }
}

/// Settings for one scheme.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SchemeSettings {
  #[serde(default)]
  pub driver: Driver,
  /// Put the metadata cache in front of the backend
  #[serde(default)]
  pub cache: bool,
}

/// Builds the backend for each configured scheme on first use and hands
/// out the same instance afterwards.
pub struct Registry<S: ?Sized> {
  settings: BTreeMap<String, SchemeSettings>,
  backends: BTreeMap<String, OnceLock<Arc<dyn Backend>>>,
  store: Arc<S>,
}

impl<S: CacheStore + ?Sized + 'static> Registry<S> {
  /// Cached schemes share `store`.
  pub fn new(settings: BTreeMap<String, SchemeSettings>, store: Arc<S>) -> Self {
    let backends = settings
      .keys()
      .map(|scheme| (scheme.clone(), OnceLock::new()))
      .collect();

    Self {
      settings,
      backends,
      store,
    }
  }

  pub fn schemes(&self) -> impl Iterator<Item = &str> {
    self.settings.keys().map(String::as_str)
  }

  pub fn settings(&self, scheme: &str) -> Option<&SchemeSettings> {
    self.settings.get(scheme)
  }

  /// The backend for `scheme`, or `None` if the scheme isn't configured.
  pub fn backend(&self, scheme: &str) -> Option<Arc<dyn Backend>> {
    let settings = self.settings.get(scheme)?;
    let slot = self.backends.get(scheme)?;
    let backend = slot.get_or_init(|| self.build(scheme, settings));
    Some(Arc::clone(backend))
  }

  fn build(&self, scheme: &str, settings: &SchemeSettings) -> Arc<dyn Backend> {
    debug!(
      scheme = scheme,
      driver = ?settings.driver,
      cache = settings.cache,
      "Initialising backend"
    );
    match settings.driver {
      Driver::Memory => self.wrap(scheme, MemoryBackend::new(), settings.cache),
      Driver::Null => self.wrap(scheme, NullBackend, settings.cache),
    }
  }

  fn wrap<B: Backend + 'static>(&self, scheme: &str, backend: B, cache: bool) -> Arc<dyn Backend> {
    if cache {
      Arc::new(CachingAdapter::new(scheme, backend, Arc::clone(&self.store)))
    } else {
      Arc::new(backend)
    }
  }
}
