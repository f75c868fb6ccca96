//! Process-wide registries for pluggable implementations.
//!
//! Machine drivers, network drivers, OCI stores, and endpoint managers are
//! resolved by name at startup from these tables. Plug-in modules call
//! [`Registry::register`] during initialisation; unregistration is not
//! supported.

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Constructor for a pluggable implementation of `T`.
pub type Constructor<T> = Arc<dyn Fn(&ProviderConfig) -> Result<Arc<T>> + Send + Sync>;

/// A named constructor table for one plug-in kind.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    constructors: RwLock<HashMap<String, Constructor<T>>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry for a plug-in kind (used in error messages).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Register a constructor under a name. A later registration under the
    /// same name replaces the earlier one.
    pub fn register<F>(&self, name: &str, constructor: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(name.to_string(), Arc::new(constructor));
    }

    /// Resolve and construct the implementation registered under `name`.
    pub fn resolve(&self, name: &str, config: &ProviderConfig) -> Result<Arc<T>> {
        let constructor = self
            .constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::config(
                    "resolve",
                    format!("no {} registered under name: {}", self.kind, name),
                )
            })?;
        constructor(config)
    }

    /// Names currently registered, for startup diagnostics.
    pub fn names(&self) -> Vec<String> {
        self.constructors.read().keys().cloned().collect()
    }
}
