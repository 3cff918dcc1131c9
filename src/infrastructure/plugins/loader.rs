//! Plugin loader - resolves module sources to export tables, with a reloadable cache

use std::collections::{BTreeMap, HashMap};
use std::env::consts::DLL_EXTENSION;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use libloading::{Library, Symbol};
use uuid::Uuid;

use super::manifest::PluginManifest;
use crate::application::errors::{PluginError, PluginResult};
use crate::plugins::{ExportTable, SourceLocator};

/// Symbol every shared-library plugin exports
pub const EXPORTS_SYMBOL: &[u8] = b"plugbot_plugin_exports";

/// Function signature of `plugbot_plugin_exports`. Returns a boxed export table.
#[allow(improper_ctypes_definitions)]
pub type PluginExportsFn = extern "C" fn() -> *mut ExportTable;

/// Factory for a plugin bundled with the runtime
pub type BuiltinFactory = fn() -> ExportTable;

/// Seam between the plugin manager and module code. `invalidate` must make the next
/// `load` of the same locator produce fresh exports.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, locator: &SourceLocator) -> PluginResult<Arc<LoadedModule>>;

    fn invalidate(&self, locator: &SourceLocator);

    /// Names of bundled plugins, in registration order
    fn builtin_names(&self) -> Vec<String>;

    fn has_builtin(&self, name: &str) -> bool {
        self.builtin_names().iter().any(|n| n == name)
    }
}

/// Loaded plugin module. Shared-library modules are opened from a private copy
/// of the library file, so every load maps a fresh image.
pub struct LoadedModule {
    exports: ExportTable,
    manifest: Option<PluginManifest>,
    library: Option<Library>,
    shadow: Option<PathBuf>,
}

impl LoadedModule {
    pub fn new(exports: ExportTable) -> Self {
        Self {
            exports,
            manifest: None,
            library: None,
            shadow: None,
        }
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    pub fn manifest(&self) -> Option<&PluginManifest> {
        self.manifest.as_ref()
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        // the hooks point into the library, release them before closing it
        self.exports = ExportTable::default();
        drop(self.library.take());
        if let Some(shadow) = self.shadow.take() {
            if let Err(e) = std::fs::remove_file(&shadow) {
                tracing::debug!("Failed to remove {}: {}", shadow.display(), e);
            }
        }
    }
}

/// Unique location for a private copy of `library`
fn shadow_path(library: &Path) -> PathBuf {
    let stem = library
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("plugin");
    let extension = library
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or(DLL_EXTENSION);
    std::env::temp_dir()
        .join("plugbot-modules")
        .join(format!("{}-{}.{}", stem, Uuid::new_v4().simple(), extension))
}

fn copy_to_shadow(library: &Path) -> PluginResult<PathBuf> {
    let shadow = shadow_path(library);
    if let Some(parent) = shadow.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PluginError::Load(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    std::fs::copy(library, &shadow)
        .map_err(|e| PluginError::Load(format!("Failed to copy {}: {}", library.display(), e)))?;
    Ok(shadow)
}

/// Loads bundled plugins from factories and directory plugins from shared libraries
pub struct PluginLoader {
    builtins: BTreeMap<String, BuiltinFactory>,
    order: Vec<String>,
    cache: Mutex<HashMap<SourceLocator, Arc<LoadedModule>>>,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self {
            builtins: BTreeMap::new(),
            order: Vec::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_builtin(mut self, name: impl Into<String>, factory: BuiltinFactory) -> Self {
        let name = name.into();
        if self.builtins.insert(name.clone(), factory).is_none() {
            self.order.push(name);
        }
        self
    }

    /// Load a plugin directory containing `plugin.yaml` and its shared library
    pub fn load_dir(&self, path: &Path) -> PluginResult<LoadedModule> {
        let manifest = PluginManifest::from_dir(path).ok_or_else(|| {
            PluginError::Load(format!("Missing plugin.yaml in {}", path.display()))
        })??;

        let library_path = manifest.library_path(path);
        if !library_path.exists() {
            return Err(PluginError::Load(format!(
                "Library not found: {}",
                library_path.display()
            )));
        }

        let shadow = copy_to_shadow(&library_path)?;
        let mut module = LoadedModule {
            exports: ExportTable::default(),
            manifest: None,
            library: None,
            shadow: Some(shadow.clone()),
        };

        // Safety: loading runs the library's initialisers; plugin directories are trusted
        let library = unsafe {
            Library::new(&shadow)
                .map_err(|e| PluginError::Load(format!("Failed to load library: {}", e)))?
        };

        let exports = unsafe {
            let exports_fn: Symbol<PluginExportsFn> = library.get(EXPORTS_SYMBOL).map_err(|e| {
                PluginError::Load(format!("Failed to find export table: {}", e))
            })?;
            let table = exports_fn();
            if table.is_null() {
                return Err(PluginError::Load("Plugin returned a null export table".to_string()));
            }
            *Box::from_raw(table)
        };

        tracing::info!(
            "Loaded plugin module: {} v{}",
            manifest.name,
            manifest.version.as_deref().unwrap_or("0.0.0")
        );

        module.library = Some(library);
        module.exports = exports;
        module.manifest = Some(manifest);
        Ok(module)
    }

    fn load_uncached(&self, locator: &SourceLocator) -> PluginResult<LoadedModule> {
        match locator {
            SourceLocator::Builtin(name) => {
                let factory = self
                    .builtins
                    .get(name)
                    .ok_or_else(|| PluginError::NotFound(name.clone()))?;
                Ok(LoadedModule::new(factory()))
            }
            SourceLocator::Path(path) => self.load_dir(path),
        }
    }
}

impl ModuleLoader for PluginLoader {
    fn load(&self, locator: &SourceLocator) -> PluginResult<Arc<LoadedModule>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = cache.get(locator) {
            return Ok(module.clone());
        }
        let module = Arc::new(self.load_uncached(locator)?);
        cache.insert(locator.clone(), module.clone());
        Ok(module)
    }

    fn invalidate(&self, locator: &SourceLocator) {
        let removed = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(locator);
        if removed.is_some() {
            tracing::debug!("Invalidated module cache for {}", locator);
        }
    }

    fn builtin_names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn has_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}
