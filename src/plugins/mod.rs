//! Plugin system
//!
//! A plugin is a set of async hooks (`install`, `uninstall`, `enable`, `disable`) either
//! supplied in-process or loaded from a module, bound per bot by the `PluginManager`.

pub mod builtin;
pub mod context;
pub mod manager;
pub mod plugin;
pub mod trait_def;

pub use context::PluginContext;
pub use manager::{PluginManager, ResolvedPlugin};
pub use plugin::{Bindings, Plugin};
pub use trait_def::{
    BotHook, ExportTable, HookFuture, InstallHook, PluginDesc, PluginKind, PluginSource,
    SourceLocator, UninstallHook,
};
