//! Plugin export contract and descriptors

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use super::context::PluginContext;
use crate::domain::traits::Bot;

/// Future returned by every lifecycle hook. The error string is the human-readable cause.
pub type HookFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

pub type InstallHook = Arc<dyn Fn(PluginContext, serde_json::Value) -> HookFuture + Send + Sync>;
pub type UninstallHook = Arc<dyn Fn(PluginContext) -> HookFuture + Send + Sync>;
pub type BotHook = Arc<dyn Fn(Arc<dyn Bot>) -> HookFuture + Send + Sync>;

/// Hooks a plugin module exports. Only `install` is mandatory.
#[derive(Clone, Default)]
pub struct ExportTable {
    pub install: Option<InstallHook>,
    pub uninstall: Option<UninstallHook>,
    pub enable: Option<BotHook>,
    pub disable: Option<BotHook>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_install<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PluginContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.install = Some(Arc::new(move |ctx, config| Box::pin(hook(ctx, config))));
        self
    }

    pub fn on_uninstall<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.uninstall = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn on_enable<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<dyn Bot>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.enable = Some(Arc::new(move |bot| Box::pin(hook(bot))));
        self
    }

    pub fn on_disable<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<dyn Bot>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.disable = Some(Arc::new(move |bot| Box::pin(hook(bot))));
        self
    }
}

impl fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportTable")
            .field("install", &self.install.is_some())
            .field("uninstall", &self.uninstall.is_some())
            .field("enable", &self.enable.is_some())
            .field("disable", &self.disable.is_some())
            .finish()
    }
}

/// Where a plugin was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Bundled with the runtime
    Builtin,
    /// Organisation-scoped package
    Official,
    /// Community package
    Community,
    /// Local plugin directory
    Custom,
    /// Hooks supplied in-process, with nothing on disk
    Inline,
}

/// Listing entry returned by `PluginManager::list_all`
#[derive(Debug, Clone, Serialize)]
pub struct PluginDesc {
    pub name: String,
    pub kind: PluginKind,
    /// Resolved package or directory name
    pub full_name: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub installed: bool,
    /// Ids of the bots the plugin is enabled for
    pub binds: Vec<String>,
}

/// Location of a loadable plugin module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceLocator {
    Builtin(String),
    Path(PathBuf),
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Builtin(name) => write!(f, "builtin:{}", name),
            SourceLocator::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// What a plugin is made from
#[derive(Debug, Clone)]
pub enum PluginSource {
    /// Hooks supplied in-process; never reloaded
    Inline(ExportTable),
    /// Module loaded (and re-loaded on restart) through the module loader
    Module(SourceLocator),
}

impl PluginSource {
    pub fn locator(&self) -> Option<&SourceLocator> {
        match self {
            PluginSource::Inline(_) => None,
            PluginSource::Module(locator) => Some(locator),
        }
    }
}
