//! Plugin manager - resolves, installs and binds plugins

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::context::PluginContext;
use super::plugin::Plugin;
use super::trait_def::{ExportTable, PluginDesc, PluginKind, PluginSource, SourceLocator};
use crate::application::errors::{PluginError, PluginResult};
use crate::application::events::AppEvent;
use crate::application::messaging::Dispatcher;
use crate::domain::traits::{Bot, PluginStore};
use crate::infrastructure::config::{PluginConfig, PluginEntry};
use crate::infrastructure::plugins::{ModuleLoader, PluginManifest, PluginRegistry, MANIFEST_FILE};

/// Outcome of name resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlugin {
    pub kind: PluginKind,
    pub full_name: String,
    pub locator: SourceLocator,
}

/// Manages all plugins for the application. Lifecycle operations are serialized.
pub struct PluginManager {
    config: PluginConfig,
    app: Arc<Dispatcher>,
    loader: Arc<dyn ModuleLoader>,
    store: Arc<dyn PluginStore>,
    registry: PluginRegistry,
    lifecycle: Mutex<()>,
}

impl PluginManager {
    pub fn new(
        config: PluginConfig,
        app: Arc<Dispatcher>,
        loader: Arc<dyn ModuleLoader>,
        store: Arc<dyn PluginStore>,
    ) -> Self {
        Self {
            config,
            app,
            loader,
            store,
            registry: PluginRegistry::new(),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn app(&self) -> &Arc<Dispatcher> {
        &self.app
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    fn org_dir(&self) -> PathBuf {
        self.config
            .packages_dir
            .join(format!("@{}", self.config.org_scope))
    }

    fn community_prefix(&self) -> String {
        format!("{}-plugin-", self.config.ecosystem_prefix)
    }

    /// Find where a plugin lives: custom directory (with a `plugin.yaml`), built-in,
    /// organisation package, then community package.
    pub fn resolve(&self, name: &str) -> PluginResult<ResolvedPlugin> {
        let custom = self.config.directory.join(name);
        if is_plugin_dir(&custom) && custom.join(MANIFEST_FILE).is_file() {
            return Ok(ResolvedPlugin {
                kind: PluginKind::Custom,
                full_name: name.to_string(),
                locator: SourceLocator::Path(custom),
            });
        }

        if self.loader.has_builtin(name) {
            return Ok(ResolvedPlugin {
                kind: PluginKind::Builtin,
                full_name: name.to_string(),
                locator: SourceLocator::Builtin(name.to_string()),
            });
        }

        let official = self.org_dir().join(format!("plugin-{}", name));
        if official.is_dir() {
            return Ok(ResolvedPlugin {
                kind: PluginKind::Official,
                full_name: format!("@{}/plugin-{}", self.config.org_scope, name),
                locator: SourceLocator::Path(official),
            });
        }

        let full_name = format!("{}{}", self.community_prefix(), name);
        let community = self.config.packages_dir.join(&full_name);
        if community.is_dir() {
            return Ok(ResolvedPlugin {
                kind: PluginKind::Community,
                full_name,
                locator: SourceLocator::Path(community),
            });
        }

        Err(PluginError::NotFound(name.to_string()))
    }

    fn build(&self, name: &str, source: PluginSource) -> Arc<Plugin> {
        Arc::new(Plugin::new(
            name,
            source,
            self.loader.clone(),
            self.store.clone(),
            PluginContext::new(name, self.app.clone()),
        ))
    }

    /// The installed plugin of that name, or a fresh uninstalled one resolved from disk
    pub fn import(&self, name: &str) -> PluginResult<Arc<Plugin>> {
        if let Some(plugin) = self.registry.get(name) {
            return Ok(plugin);
        }
        let resolved = self.resolve(name)?;
        debug!("Resolved plugin {} to {}", name, resolved.locator);
        Ok(self.build(name, PluginSource::Module(resolved.locator)))
    }

    /// Plugin backed by in-process hooks
    pub fn inline(&self, name: &str, exports: ExportTable) -> Arc<Plugin> {
        self.build(name, PluginSource::Inline(exports))
    }

    pub async fn install(&self, plugin: Arc<Plugin>, config: serde_json::Value) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.registry.is_installed(plugin.name()) {
            return Err(PluginError::AlreadyInstalled(plugin.name().to_string()));
        }
        if let Err(e) = plugin.install(config).await {
            plugin.release();
            return Err(e);
        }
        self.registry.register(plugin.clone())?;
        self.app
            .events()
            .publish(AppEvent::PluginInstalled(plugin.name().to_string()));
        Ok(())
    }

    pub async fn install_by_name(&self, name: &str, config: serde_json::Value) -> PluginResult<()> {
        if self.registry.is_installed(name) {
            return Err(PluginError::AlreadyInstalled(name.to_string()));
        }
        let plugin = self.import(name)?;
        self.install(plugin, config).await
    }

    pub fn check_install(&self, name: &str) -> PluginResult<Arc<Plugin>> {
        self.registry
            .get(name)
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))
    }

    pub async fn uninstall(&self, name: &str) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        let plugin = self.check_install(name)?;
        let binds = plugin.bound_ids();
        plugin.uninstall().await;
        self.registry.unregister(name)?;
        for bot in binds {
            self.app.events().publish(AppEvent::PluginDisabled {
                plugin: name.to_string(),
                bot,
            });
        }
        self.app
            .events()
            .publish(AppEvent::PluginUninstalled(name.to_string()));
        Ok(())
    }

    /// Reload a plugin in place. A plugin that fails to come back is uninstalled.
    pub async fn restart(&self, name: &str) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        let plugin = self.check_install(name)?;
        let binds = plugin.bound_ids();
        if let Err(e) = plugin.restart().await {
            warn!("{}, uninstalling", e);
            self.registry.unregister(name)?;
            for bot in binds {
                self.app.events().publish(AppEvent::PluginDisabled {
                    plugin: name.to_string(),
                    bot,
                });
            }
            self.app
                .events()
                .publish(AppEvent::PluginUninstalled(name.to_string()));
            return Err(e);
        }
        Ok(())
    }

    pub async fn enable(&self, name: &str, bot: Arc<dyn Bot>) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        let bot_id = bot.self_id().to_string();
        self.check_install(name)?.enable(bot).await?;
        self.app.events().publish(AppEvent::PluginEnabled {
            plugin: name.to_string(),
            bot: bot_id,
        });
        Ok(())
    }

    pub async fn disable(&self, name: &str, bot_id: &str) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.check_install(name)?.disable(bot_id).await?;
        self.app.events().publish(AppEvent::PluginDisabled {
            plugin: name.to_string(),
            bot: bot_id.to_string(),
        });
        Ok(())
    }

    /// Unbind every plugin from a bot that is going away. Persisted sets are kept
    /// so the bot gets the same plugins back on `restore`.
    pub async fn disable_all(&self, bot_id: &str) {
        let _guard = self.lifecycle.lock().await;
        for plugin in self.registry.all() {
            if !plugin.is_enabled_for(bot_id) {
                continue;
            }
            match plugin.detach(bot_id).await {
                Ok(()) => self.app.events().publish(AppEvent::PluginDisabled {
                    plugin: plugin.name().to_string(),
                    bot: bot_id.to_string(),
                }),
                Err(e) => warn!("{}", e),
            }
        }
    }

    /// Re-enable every plugin persisted for this bot. Failures are logged per plugin.
    /// Returns the names that were enabled.
    pub async fn restore(&self, bot: Arc<dyn Bot>) -> Vec<String> {
        let bot_id = bot.self_id().to_string();
        let mut restored = Vec::new();
        for name in self.store.load(&bot_id).await {
            match self.enable(&name, bot.clone()).await {
                Ok(()) => restored.push(name),
                Err(PluginError::AlreadyEnabled { .. }) => {}
                Err(e) => warn!("Failed to restore plugin {} for bot {}: {}", name, bot_id, e),
            }
        }
        info!("Restored {} plugin(s) for bot {}", restored.len(), bot_id);
        restored
    }

    /// Attach a bot: every built-in is enabled, then its persisted set is restored
    pub async fn add_bot(&self, bot: Arc<dyn Bot>) {
        self.app.add_bot(bot.clone());
        for name in self.loader.builtin_names() {
            if !self.registry.is_installed(&name) {
                continue;
            }
            match self.enable(&name, bot.clone()).await {
                Ok(()) | Err(PluginError::AlreadyEnabled { .. }) => {}
                Err(e) => warn!("Failed to enable built-in {}: {}", name, e),
            }
        }
        self.restore(bot).await;
    }

    pub async fn remove_bot(&self, bot_id: &str) -> Option<Arc<dyn Bot>> {
        self.disable_all(bot_id).await;
        self.app.remove_bot(bot_id)
    }

    /// Install every built-in, then the configured plugin entries.
    /// Returns the errors of entries that failed; they do not stop the others.
    pub async fn load_from_config(&self) -> Vec<PluginError> {
        let mut errors = Vec::new();
        for name in self.loader.builtin_names() {
            let plugin = self.build(&name, PluginSource::Module(SourceLocator::Builtin(name.clone())));
            if let Err(e) = self.install(plugin, serde_json::Value::Null).await {
                warn!("Failed to install built-in {}: {}", name, e);
                errors.push(e);
            }
        }
        let entries: Vec<PluginEntry> = self.config.entries.clone();
        for entry in entries {
            info!("Installing plugin {}", entry.name);
            if let Err(e) = self.install_by_name(&entry.name, entry.config).await {
                warn!("Failed to install plugin {}: {}", entry.name, e);
                errors.push(e);
            }
        }
        errors
    }

    /// Everything that could be installed plus everything that is, deduplicated by name
    pub fn list_all(&self) -> Vec<PluginDesc> {
        let mut found: Vec<PluginDesc> = Vec::new();

        for name in self.loader.builtin_names() {
            found.push(describe(&name, PluginKind::Builtin, &name, None));
        }

        for (name, path) in list_dirs(&self.config.directory) {
            match PluginManifest::from_dir(&path) {
                Some(Ok(manifest)) => {
                    found.push(describe(&name, PluginKind::Custom, &name, Some(&manifest)))
                }
                Some(Err(e)) => debug!("Skipping {}: {}", path.display(), e),
                None => {}
            }
        }

        for (dir, path) in list_dirs(&self.org_dir()) {
            if let Some(name) = dir.strip_prefix("plugin-") {
                let full_name = format!("@{}/{}", self.config.org_scope, dir);
                let manifest = PluginManifest::from_dir(&path).and_then(Result::ok);
                found.push(describe(name, PluginKind::Official, &full_name, manifest.as_ref()));
            }
        }

        let prefix = self.community_prefix();
        for (dir, path) in list_dirs(&self.config.packages_dir) {
            if let Some(name) = dir.strip_prefix(prefix.as_str()) {
                let manifest = PluginManifest::from_dir(&path).and_then(Result::ok);
                found.push(describe(name, PluginKind::Community, &dir, manifest.as_ref()));
            }
        }

        for plugin in self.registry.all() {
            let kind = match plugin.source() {
                PluginSource::Inline(_) => PluginKind::Inline,
                PluginSource::Module(SourceLocator::Builtin(_)) => PluginKind::Builtin,
                PluginSource::Module(SourceLocator::Path(_)) => PluginKind::Custom,
            };
            let manifest = plugin.module().and_then(|m| m.manifest().cloned());
            found.push(describe(plugin.name(), kind, plugin.name(), manifest.as_ref()));
        }

        let mut seen = HashSet::new();
        found
            .into_iter()
            .filter(|desc| seen.insert(desc.name.clone()))
            .map(|mut desc| {
                if let Some(plugin) = self.registry.get(&desc.name) {
                    desc.installed = true;
                    desc.binds = plugin.bound_ids();
                }
                desc
            })
            .collect()
    }
}

fn describe(name: &str, kind: PluginKind, full_name: &str, manifest: Option<&PluginManifest>) -> PluginDesc {
    PluginDesc {
        name: name.to_string(),
        kind,
        full_name: full_name.to_string(),
        description: manifest.and_then(|m| m.description.clone()),
        author: manifest.and_then(|m| m.author.clone()),
        version: manifest.and_then(|m| m.version.clone()),
        installed: false,
        binds: Vec::new(),
    }
}

/// Directory or symlink entry
fn is_plugin_dir(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => meta.is_dir() || meta.file_type().is_symlink(),
        Err(_) => false,
    }
}

/// Visible subdirectories (and symlinks) of `dir`, sorted by name. A missing directory is empty.
fn list_dirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let path = entry.path();
            (!name.starts_with('.') && is_plugin_dir(&path)).then_some((name, path))
        })
        .collect();
    dirs.sort();
    dirs
}
