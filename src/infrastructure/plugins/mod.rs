//! Plugin infrastructure
//!
//! Plugins are bundled factories or directories with a `plugin.yaml` manifest and a
//! shared library exporting `plugbot_plugin_exports`.

pub mod loader;
pub mod manifest;
pub mod registry;

pub use loader::{BuiltinFactory, LoadedModule, ModuleLoader, PluginLoader, EXPORTS_SYMBOL};
pub use manifest::{PluginManifest, MANIFEST_FILE};
pub use registry::PluginRegistry;
