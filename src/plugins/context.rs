//! Capabilities handed to a plugin's install hook

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::application::events::AppEvent;
use crate::application::messaging::{BeforeAttachHook, Dispatcher, Middleware, MiddlewareId};
use crate::domain::entities::{Command, KeepAlive};
use crate::infrastructure::plugins::LoadedModule;

/// Registrations made through the context are owned by the plugin and
/// dropped when it is uninstalled or restarted. Each one holds the module that
/// was current when it was made, so in-flight dispatch never outlives the code.
#[derive(Clone)]
pub struct PluginContext {
    plugin: String,
    app: Arc<Dispatcher>,
    module: Arc<RwLock<Option<Arc<LoadedModule>>>>,
}

impl PluginContext {
    pub fn new(plugin: impl Into<String>, app: Arc<Dispatcher>) -> Self {
        Self {
            plugin: plugin.into(),
            app,
            module: Arc::new(RwLock::new(None)),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn app(&self) -> &Arc<Dispatcher> {
        &self.app
    }

    pub(crate) fn module(&self) -> Option<Arc<LoadedModule>> {
        self.module
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_module(&self, module: Option<Arc<LoadedModule>>) {
        *self.module.write().unwrap_or_else(PoisonError::into_inner) = module;
    }

    fn keep_alive(&self) -> Option<KeepAlive> {
        self.module().map(|module| module as KeepAlive)
    }

    pub fn command(&self, command: Command) {
        let command = command.with_owner(self.plugin.clone());
        let command = match self.keep_alive() {
            Some(keep_alive) => command.with_keep_alive(keep_alive),
            None => command,
        };
        self.app.register_command(command);
    }

    pub fn middleware(&self, middleware: Arc<dyn Middleware>, prepend: bool) -> MiddlewareId {
        self.app
            .use_owned_middleware(&self.plugin, middleware, prepend, self.keep_alive())
    }

    pub fn before_attach(&self, hook: BeforeAttachHook) {
        self.app
            .on_before_attach(Some(&self.plugin), hook, self.keep_alive());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.app.events().subscribe()
    }

    /// Publish the bots this plugin's registrations serve
    pub(crate) fn bind(&self, bots: BTreeSet<String>) {
        self.app.set_owner_bots(&self.plugin, bots);
    }

    /// Drop everything this plugin registered
    pub fn dispose(&self) {
        tracing::debug!("Disposing registrations of plugin {}", self.plugin);
        self.app.dispose_owner(&self.plugin);
    }
}
