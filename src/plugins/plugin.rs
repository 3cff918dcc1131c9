//! Plugin - one installed plugin and its per-bot bindings

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::context::PluginContext;
use super::trait_def::{ExportTable, PluginSource};
use crate::application::errors::{PluginError, PluginResult};
use crate::domain::traits::{Bot, PluginStore};
use crate::infrastructure::plugins::{LoadedModule, ModuleLoader};

/// Copy-on-write binding set: bot id -> bot
pub type Bindings = Arc<BTreeMap<String, Arc<dyn Bot>>>;

pub struct Plugin {
    name: String,
    source: PluginSource,
    loader: Arc<dyn ModuleLoader>,
    store: Arc<dyn PluginStore>,
    bindings: RwLock<Bindings>,
    config: RwLock<serde_json::Value>,
    context: PluginContext,
}

impl Plugin {
    pub fn new(
        name: impl Into<String>,
        source: PluginSource,
        loader: Arc<dyn ModuleLoader>,
        store: Arc<dyn PluginStore>,
        context: PluginContext,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            loader,
            store,
            bindings: RwLock::new(Arc::new(BTreeMap::new())),
            config: RwLock::new(serde_json::Value::Null),
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &PluginSource {
        &self.source
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Config the plugin was installed with
    pub fn config(&self) -> serde_json::Value {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Consistent snapshot of the current bindings
    pub fn bindings(&self) -> Bindings {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn bound_ids(&self) -> Vec<String> {
        self.bindings().keys().cloned().collect()
    }

    pub fn is_enabled_for(&self, bot_id: &str) -> bool {
        self.bindings().contains_key(bot_id)
    }

    pub fn module(&self) -> Option<Arc<LoadedModule>> {
        self.context.module()
    }

    /// Swap in a new binding snapshot and let dispatch see it
    fn update_bindings(&self, f: impl FnOnce(&mut BTreeMap<String, Arc<dyn Bot>>)) {
        let mut guard = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        f(&mut next);
        self.context.bind(next.keys().cloned().collect());
        *guard = Arc::new(next);
    }

    /// Current export table, loading the module when it is not resident
    fn exports(&self) -> PluginResult<ExportTable> {
        match &self.source {
            PluginSource::Inline(exports) => Ok(exports.clone()),
            PluginSource::Module(locator) => {
                if let Some(module) = self.module() {
                    return Ok(module.exports().clone());
                }
                let module = self.loader.load(locator)?;
                let exports = module.exports().clone();
                self.context.set_module(Some(module));
                Ok(exports)
            }
        }
    }

    fn hook_error(&self, hook: &'static str) -> impl FnOnce(String) -> PluginError + '_ {
        move |cause| PluginError::Hook {
            plugin: self.name.clone(),
            hook,
            cause,
        }
    }

    /// Load fresh module code and run the install hook
    pub async fn install(&self, config: serde_json::Value) -> PluginResult<()> {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        if let Some(locator) = self.source.locator() {
            self.loader.invalidate(locator);
            let module = self.loader.load(locator)?;
            self.context.set_module(Some(module));
        }

        let install = self.exports()?.install.ok_or_else(|| PluginError::MissingHook {
            plugin: self.name.clone(),
            hook: "install",
        })?;
        install(self.context.clone(), config)
            .await
            .map_err(self.hook_error("install"))?;

        tracing::info!("Plugin {} installed", self.name);
        Ok(())
    }

    /// Bind to a bot. A failing enable hook leaves the plugin unbound.
    pub async fn enable(&self, bot: Arc<dyn Bot>) -> PluginResult<()> {
        let bot_id = bot.self_id().to_string();
        if self.is_enabled_for(&bot_id) {
            return Err(PluginError::AlreadyEnabled {
                plugin: self.name.clone(),
                bot: bot_id,
            });
        }

        match self.exports()?.enable {
            Some(hook) => hook(bot.clone()).await.map_err(self.hook_error("enable"))?,
            None => tracing::warn!("Plugin {} does not export an enable hook", self.name),
        }

        if let Err(e) = self.store.add(&bot_id, &self.name).await {
            tracing::warn!("Failed to persist plugin {} for bot {}: {}", self.name, bot_id, e);
        }
        self.update_bindings(|bindings| {
            bindings.insert(bot_id.clone(), bot);
        });

        tracing::info!("Plugin {} enabled for bot {}", self.name, bot_id);
        Ok(())
    }

    pub async fn disable(&self, bot_id: &str) -> PluginResult<()> {
        self.unbind(bot_id, true).await
    }

    /// Unbind without touching the persisted set
    pub async fn detach(&self, bot_id: &str) -> PluginResult<()> {
        self.unbind(bot_id, false).await
    }

    async fn unbind(&self, bot_id: &str, persist: bool) -> PluginResult<()> {
        let bot = self
            .bindings()
            .get(bot_id)
            .cloned()
            .ok_or_else(|| PluginError::NotEnabled {
                plugin: self.name.clone(),
                bot: bot_id.to_string(),
            })?;

        match self.exports() {
            Ok(ExportTable {
                disable: Some(hook),
                ..
            }) => {
                if let Err(cause) = hook(bot).await {
                    tracing::warn!("Plugin {} failed in disable: {}", self.name, cause);
                }
            }
            Ok(_) => tracing::debug!("Plugin {} does not export a disable hook", self.name),
            Err(e) => tracing::warn!("Plugin {} exports unavailable: {}", self.name, e),
        }

        if persist {
            if let Err(e) = self.store.remove(bot_id, &self.name).await {
                tracing::warn!("Failed to unpersist plugin {} for bot {}: {}", self.name, bot_id, e);
            }
        }
        self.update_bindings(|bindings| {
            bindings.remove(bot_id);
        });

        tracing::info!("Plugin {} disabled for bot {}", self.name, bot_id);
        Ok(())
    }

    /// Unbind everything, run the uninstall hook and drop module code.
    /// Never fails; problems are logged.
    async fn teardown(&self, persist: bool) {
        for bot_id in self.bound_ids() {
            if let Err(e) = self.unbind(&bot_id, persist).await {
                tracing::warn!("{}", e);
            }
        }

        match self.exports() {
            Ok(ExportTable {
                uninstall: Some(hook),
                ..
            }) => {
                if let Err(cause) = hook(self.context.clone()).await {
                    tracing::warn!("Plugin {} failed in uninstall: {}", self.name, cause);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Plugin {} exports unavailable: {}", self.name, e),
        }

        self.release();
    }

    /// Drop registrations and module code. Registrations still in use keep
    /// their module loaded until they finish.
    pub(crate) fn release(&self) {
        if let Some(locator) = self.source.locator() {
            self.loader.invalidate(locator);
        }
        self.context.dispose();
        self.context.set_module(None);
    }

    pub async fn uninstall(&self) {
        self.teardown(true).await;
        tracing::info!("Plugin {} uninstalled", self.name);
    }

    /// Reload the plugin and re-enable it for exactly the bots bound before the call.
    /// On failure the plugin is left fully torn down with no bindings; persisted
    /// sets are kept so a later install restores it.
    pub async fn restart(&self) -> PluginResult<()> {
        let snapshot = self.bindings();
        let config = self.config();

        let result = async {
            if let Some(locator) = self.source.locator() {
                self.loader.invalidate(locator);
            }
            self.teardown(false).await;
            self.install(config).await?;
            for bot in snapshot.values() {
                self.enable(bot.clone()).await?;
            }
            Ok::<_, PluginError>(())
        }
        .await;

        if let Err(e) = result {
            for bot_id in self.bound_ids() {
                if let Err(e) = self.unbind(&bot_id, false).await {
                    tracing::warn!("{}", e);
                }
            }
            self.release();
            return Err(PluginError::Restart {
                plugin: self.name.clone(),
                cause: e.to_string(),
            });
        }
        tracing::info!("Plugin {} restarted", self.name);
        Ok(())
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("binds", &self.bound_ids())
            .finish()
    }
}
