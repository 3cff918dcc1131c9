//! Plugin registry - installed plugins keyed by name

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::application::errors::PluginError;
use crate::plugins::Plugin;

/// Registry for managing installed plugins
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Arc<Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register an installed plugin. A name can only be registered once.
    pub fn register(&self, plugin: Arc<Plugin>) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        let name = plugin.name().to_string();
        if plugins.contains_key(&name) {
            return Err(PluginError::AlreadyInstalled(name));
        }
        plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Plugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<Plugin>, PluginError> {
        let removed = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(plugin) => {
                tracing::info!("Unregistered plugin: {}", name);
                Ok(plugin)
            }
            None => Err(PluginError::NotInstalled(name.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
