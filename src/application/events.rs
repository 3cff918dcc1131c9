//! Event bus - publish/subscribe capability shared by the dispatcher, plugins and services

use tokio::sync::broadcast;

use crate::application::messaging::Session;

const DEFAULT_CAPACITY: usize = 256;

/// Everything that is published on the bus
#[derive(Debug, Clone)]
pub enum AppEvent {
    Message(Session),
    Notice(Session),
    Request(Session),
    BotAdded(String),
    BotRemoved(String),
    PluginInstalled(String),
    PluginUninstalled(String),
    PluginEnabled { plugin: String, bot: String },
    PluginDisabled { plugin: String, bot: String },
    CommandAdded(String),
    CommandRemoved(String),
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::Message(_) => "message",
            AppEvent::Notice(_) => "notice",
            AppEvent::Request(_) => "request",
            AppEvent::BotAdded(_) => "bot-add",
            AppEvent::BotRemoved(_) => "bot-remove",
            AppEvent::PluginInstalled(_) => "plugin-add",
            AppEvent::PluginUninstalled(_) => "plugin-remove",
            AppEvent::PluginEnabled { .. } => "plugin-enable",
            AppEvent::PluginDisabled { .. } => "plugin-disable",
            AppEvent::CommandAdded(_) => "command-add",
            AppEvent::CommandRemoved(_) => "command-remove",
        }
    }
}

/// Broadcast bus. Slow subscribers lose the oldest events rather than blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Publish to every current subscriber; having none is not an error
    pub fn publish(&self, event: AppEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(event = name, receivers, "published"),
            Err(_) => tracing::trace!(event = name, "published with no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
