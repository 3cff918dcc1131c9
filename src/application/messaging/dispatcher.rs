//! Message dispatcher - wraps inbound events in sessions and walks the middleware list

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::oneshot;

use super::middleware::{middleware_fn, Middleware, MiddlewareId, MiddlewareOutcome};
use super::session::Session;
use crate::application::argv::{Action, ArgValue, TypeRegistry};
use crate::application::errors::BotError;
use crate::application::events::{AppEvent, EventBus};
use crate::domain::entities::{ChannelId, Command, CommandTable, EventKind, InboundEvent, KeepAlive};
use crate::domain::traits::{Bot, MessageReceipt};

/// Hook run for every message before it is attached to listeners. Not awaited by dispatch.
pub type BeforeAttachHook = Arc<dyn Fn(Session) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Command prefix stripped before parsing, e.g. `/`
    pub prefix: String,
    /// Default timeout for prompts and waits
    pub prompt_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            prefix: "/".to_string(),
            prompt_timeout: Duration::from_secs(60),
        }
    }
}

struct MiddlewareEntry {
    id: MiddlewareId,
    owner: Option<String>,
    middleware: Arc<dyn Middleware>,
    keep_alive: Option<KeepAlive>,
}

struct BeforeAttachEntry {
    owner: Option<String>,
    hook: BeforeAttachHook,
    keep_alive: Option<KeepAlive>,
}

/// The application: bots, middleware, commands and the event bus
pub struct Dispatcher {
    config: DispatcherConfig,
    middleware: RwLock<Vec<MiddlewareEntry>>,
    next_id: AtomicU64,
    commands: RwLock<CommandTable>,
    registry: RwLock<TypeRegistry>,
    before_attach: RwLock<Vec<BeforeAttachEntry>>,
    bots: RwLock<BTreeMap<String, Arc<dyn Bot>>>,
    /// Bots each plugin is enabled for; owned registrations only see those bots
    owner_bots: RwLock<HashMap<String, BTreeSet<String>>>,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            middleware: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            commands: RwLock::new(CommandTable::new()),
            registry: RwLock::new(TypeRegistry::new()),
            before_attach: RwLock::new(Vec::new()),
            bots: RwLock::new(BTreeMap::new()),
            owner_bots: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -- bots --

    pub fn add_bot(&self, bot: Arc<dyn Bot>) {
        let id = bot.self_id().to_string();
        self.bots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), bot);
        tracing::info!("Bot {} attached", id);
        self.events.publish(AppEvent::BotAdded(id));
    }

    pub fn remove_bot(&self, id: &str) -> Option<Arc<dyn Bot>> {
        let removed = self
            .bots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            self.events.publish(AppEvent::BotRemoved(id.to_string()));
        }
        removed
    }

    pub fn bot(&self, id: &str) -> Option<Arc<dyn Bot>> {
        self.bots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn bots(&self) -> Vec<Arc<dyn Bot>> {
        self.bots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // -- middleware --

    /// Append a middleware, or put it in front when `prepend` is set
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>, prepend: bool) -> MiddlewareId {
        self.insert_middleware(None, middleware, prepend, None)
    }

    /// Same as `use_middleware`, recording the plugin that owns it.
    /// It only runs for bots the owner is enabled for.
    pub fn use_owned_middleware(
        &self,
        owner: &str,
        middleware: Arc<dyn Middleware>,
        prepend: bool,
        keep_alive: Option<KeepAlive>,
    ) -> MiddlewareId {
        self.insert_middleware(Some(owner.to_string()), middleware, prepend, keep_alive)
    }

    fn insert_middleware(
        &self,
        owner: Option<String>,
        middleware: Arc<dyn Middleware>,
        prepend: bool,
        keep_alive: Option<KeepAlive>,
    ) -> MiddlewareId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = MiddlewareEntry {
            id,
            owner,
            middleware,
            keep_alive,
        };
        let mut list = self.middleware.write().unwrap_or_else(PoisonError::into_inner);
        if prepend {
            list.insert(0, entry);
        } else {
            list.push(entry);
        }
        id
    }

    pub fn remove_middleware(&self, id: MiddlewareId) -> bool {
        let mut list = self.middleware.write().unwrap_or_else(PoisonError::into_inner);
        let before = list.len();
        list.retain(|entry| entry.id != id);
        list.len() != before
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn on_before_attach(
        &self,
        owner: Option<&str>,
        hook: BeforeAttachHook,
        keep_alive: Option<KeepAlive>,
    ) {
        self.before_attach
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BeforeAttachEntry {
                owner: owner.map(str::to_string),
                hook,
                keep_alive,
            });
    }

    // -- owners --

    /// Replace the set of bots `owner` is enabled for
    pub fn set_owner_bots(&self, owner: &str, bots: BTreeSet<String>) {
        self.owner_bots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner.to_string(), bots);
    }

    /// Unowned registrations are active everywhere; owned ones only for bound bots
    pub fn is_active_for(&self, owner: Option<&str>, bot_id: &str) -> bool {
        match owner {
            None => true,
            Some(owner) => self
                .owner_bots
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(owner)
                .is_some_and(|bots| bots.contains(bot_id)),
        }
    }

    // -- commands --

    pub fn register_command(&self, command: Command) {
        let name = command.name.clone();
        self.commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(command);
        self.events.publish(AppEvent::CommandAdded(name));
    }

    pub fn remove_command(&self, name: &str) -> bool {
        let removed = self
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            self.events.publish(AppEvent::CommandRemoved(name.to_string()));
        }
        removed
    }

    pub fn find_command(&self, name: &str, source: &str) -> Option<Command> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .find(name, source)
            .cloned()
    }

    /// `(usage, description)` for every command available to `bot_id`, in registration order
    pub fn command_help(&self, bot_id: &str) -> Vec<(String, Option<String>)> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all()
            .filter(|c| self.is_active_for(c.owner.as_deref(), bot_id))
            .map(|c| (c.usage.clone(), c.description.clone()))
            .collect()
    }

    pub fn parse_command(&self, command: &Command, line: &str) -> Action {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        command.parse(line, &registry)
    }

    /// Register a named type domain usable in command signatures
    pub fn register_domain<F>(&self, name: &str, transform: F, greedy: bool)
    where
        F: Fn(&str) -> Result<ArgValue, String> + Send + Sync + 'static,
    {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, transform, greedy);
    }

    pub fn strip_prefix<'a>(&self, content: &'a str) -> &'a str {
        if self.config.prefix.is_empty() {
            return content;
        }
        content.strip_prefix(self.config.prefix.as_str()).unwrap_or(content)
    }

    /// Remove every command, middleware and hook a plugin registered
    pub fn dispose_owner(&self, owner: &str) {
        let removed = self
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_owner(owner);
        for name in removed {
            self.events.publish(AppEvent::CommandRemoved(name));
        }
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.owner.as_deref() != Some(owner));
        self.before_attach
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.owner.as_deref() != Some(owner));
        self.owner_bots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(owner);
    }

    // -- dispatch --

    /// Handle one inbound event from a registered bot
    pub async fn dispatch(self: &Arc<Self>, event: InboundEvent) {
        let Some(bot) = self.bot(&event.self_id) else {
            tracing::warn!("Dropping event for unknown bot {}", event.self_id);
            return;
        };
        let session = Session::new(self.clone(), bot, event);
        match session.kind() {
            EventKind::Message => {
                self.spawn_before_attach(&session);
                self.events.publish(AppEvent::Message(session.clone()));
                let outcome = self.run_middleware(&session).await;
                tracing::debug!("[{}] Dispatch finished: {:?}", session.channel_id(), outcome);
            }
            EventKind::Notice => self.events.publish(AppEvent::Notice(session)),
            EventKind::Request => self.events.publish(AppEvent::Request(session)),
        }
    }

    fn spawn_before_attach(&self, session: &Session) {
        let hooks: Vec<(BeforeAttachHook, Option<KeepAlive>)> = self
            .before_attach
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| self.is_active_for(entry.owner.as_deref(), session.self_id()))
            .map(|entry| (entry.hook.clone(), entry.keep_alive.clone()))
            .collect();
        for (hook, keep_alive) in hooks {
            let running = hook(session.clone());
            tokio::spawn(async move {
                running.await;
                drop(hook);
                drop(keep_alive);
            });
        }
    }

    /// Walk the middleware list front to back until one of them ends dispatch.
    /// The list is snapshotted first, so registrations made meanwhile apply to later events.
    /// Middleware owned by a plugin is skipped for bots the plugin is not enabled for.
    pub async fn run_middleware(&self, session: &Session) -> MiddlewareOutcome {
        let chain: Vec<(Arc<dyn Middleware>, Option<KeepAlive>)> = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| self.is_active_for(entry.owner.as_deref(), session.self_id()))
            .map(|entry| (entry.middleware.clone(), entry.keep_alive.clone()))
            .collect();
        for (middleware, _keep_alive) in &chain {
            match middleware.handle(session).await {
                MiddlewareOutcome::Next => continue,
                MiddlewareOutcome::Stop => return MiddlewareOutcome::Stop,
                MiddlewareOutcome::Reply(content) => {
                    if let Err(e) = session.reply(&content).await {
                        tracing::warn!("[{}] Failed to send reply: {}", session.channel_id(), e);
                    }
                    return MiddlewareOutcome::Reply(content);
                }
            }
        }
        MiddlewareOutcome::Next
    }

    /// Wait for the next message accepted by `filter`. The message still flows through
    /// the rest of the pipeline. Resolves to `None` on timeout.
    pub async fn wait_message<F>(&self, filter: F, timeout: Duration) -> Option<Session>
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.wait_scoped(filter, timeout, false).await
    }

    /// One-shot front middleware. Exactly one of match or timeout completes the wait;
    /// the registration is removed either way, including when the future is dropped.
    /// With `consume` the matched message stops dispatch.
    pub(crate) async fn wait_scoped<F>(
        &self,
        filter: F,
        timeout: Duration,
        consume: bool,
    ) -> Option<Session>
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        let (tx, mut rx) = oneshot::channel::<Session>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let waiter = slot.clone();
        let id = self.use_middleware(
            middleware_fn(move |session: Session| {
                let matched = session.is_message() && filter(&session);
                let waiter = waiter.clone();
                async move {
                    if !matched {
                        return MiddlewareOutcome::Next;
                    }
                    let sender = waiter.lock().unwrap_or_else(PoisonError::into_inner).take();
                    match sender {
                        Some(sender) => {
                            let _ = sender.send(session);
                            MiddlewareOutcome::from(consume)
                        }
                        None => MiddlewareOutcome::Next,
                    }
                }
            }),
            true,
        );
        let _registration = Registration { app: self, id };

        tokio::select! {
            received = &mut rx => received.ok(),
            _ = tokio::time::sleep(timeout) => {
                let pending = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                match pending {
                    // timer won, drop the sender so a late match is ignored
                    Some(_) => None,
                    // a match raced in just before the timer
                    None => rx.await.ok(),
                }
            }
        }
    }

    /// Send one message to several channels, collecting each result
    pub async fn broadcast(
        &self,
        bot_id: &str,
        channels: &[ChannelId],
        content: &str,
    ) -> Vec<Result<MessageReceipt, BotError>> {
        let Some(bot) = self.bot(bot_id) else {
            return channels
                .iter()
                .map(|_| Err(BotError::Internal(format!("unknown bot {}", bot_id))))
                .collect();
        };
        let mut results = Vec::with_capacity(channels.len());
        for channel in channels {
            results.push(bot.send_message(channel, content, None).await);
        }
        results
    }
}

struct Registration<'a> {
    app: &'a Dispatcher,
    id: MiddlewareId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.app.remove_middleware(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::{BotInfo, BotStatus};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct RecordingBot {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Bot for RecordingBot {
        fn self_id(&self) -> &str {
            "10001"
        }

        fn bot_info(&self) -> BotInfo {
            BotInfo {
                id: "10001".into(),
                name: "test".into(),
                platform: "test".into(),
            }
        }

        fn status(&self) -> BotStatus {
            BotStatus {
                online: true,
                healthy: true,
            }
        }

        async fn start(&self, _events: mpsc::Sender<InboundEvent>) -> Result<(), BotError> {
            Ok(())
        }

        async fn send_message(
            &self,
            channel: &ChannelId,
            content: &str,
            _quote: Option<&str>,
        ) -> Result<MessageReceipt, BotError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), content.to_string()));
            Ok(MessageReceipt::new(channel.clone()))
        }
    }

    fn setup() -> (Arc<Dispatcher>, Arc<RecordingBot>) {
        let app = Dispatcher::new(DispatcherConfig::default());
        let bot = Arc::new(RecordingBot {
            sent: Mutex::new(Vec::new()),
        });
        app.add_bot(bot.clone());
        (app, bot)
    }

    fn recorder(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str, outcome: MiddlewareOutcome) -> Arc<dyn Middleware> {
        middleware_fn(move |_session: Session| {
            let log = log.clone();
            let outcome = outcome.clone();
            async move {
                log.lock().unwrap().push(tag);
                outcome
            }
        })
    }

    #[tokio::test]
    async fn test_stop_short_circuits_chain() {
        let (app, _bot) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        app.use_middleware(recorder(log.clone(), "first", MiddlewareOutcome::Stop), false);
        app.use_middleware(recorder(log.clone(), "second", MiddlewareOutcome::Next), false);

        app.dispatch(InboundEvent::private_message("10001", "42", "hi")).await;
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_prepend_runs_first() {
        let (app, _bot) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        app.use_middleware(recorder(log.clone(), "appended", MiddlewareOutcome::Next), false);
        app.use_middleware(recorder(log.clone(), "prepended", MiddlewareOutcome::Next), true);

        app.dispatch(InboundEvent::private_message("10001", "42", "hi")).await;
        assert_eq!(*log.lock().unwrap(), vec!["prepended", "appended"]);
    }

    #[tokio::test]
    async fn test_reply_outcome_is_sent_to_channel() {
        let (app, bot) = setup();
        app.use_middleware(
            middleware_fn(|_s: Session| async { MiddlewareOutcome::Reply("pong".into()) }),
            false,
        );

        app.dispatch(InboundEvent::group_message("10001", "777", "42", "ping")).await;
        assert_eq!(
            *bot.sent.lock().unwrap(),
            vec![("group:777".to_string(), "pong".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unknown_bot_is_dropped() {
        let (app, _bot) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        app.use_middleware(recorder(log.clone(), "seen", MiddlewareOutcome::Next), false);

        app.dispatch(InboundEvent::private_message("99999", "42", "hi")).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_message_receives_match() {
        let (app, _bot) = setup();
        let waiter = {
            let app = app.clone();
            tokio::spawn(async move {
                app.wait_message(|s| s.content() == "yes", Duration::from_secs(5))
                    .await
            })
        };
        while app.middleware_count() == 0 {
            tokio::task::yield_now().await;
        }

        app.dispatch(InboundEvent::private_message("10001", "42", "no")).await;
        app.dispatch(InboundEvent::private_message("10001", "42", "yes")).await;

        let session = waiter.await.unwrap().expect("should match");
        assert_eq!(session.content(), "yes");
        assert_eq!(app.middleware_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_message_times_out() {
        let (app, _bot) = setup();
        let result = app
            .wait_message(|_| true, Duration::from_millis(20))
            .await;
        assert!(result.is_none());
        assert_eq!(app.middleware_count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_owner_removes_registrations() {
        let (app, _bot) = setup();
        app.register_command(Command::new("ping").unwrap().with_owner("pinger"));
        app.register_command(Command::new("echo <msg:text>").unwrap());
        app.use_owned_middleware(
            "pinger",
            middleware_fn(|_s: Session| async { MiddlewareOutcome::Next }),
            false,
            None,
        );

        app.dispose_owner("pinger");
        assert!(app.find_command("ping", "ping").is_none());
        assert!(app.find_command("echo", "echo hi").is_some());
        assert_eq!(app.middleware_count(), 0);
    }

    #[tokio::test]
    async fn test_owned_middleware_runs_only_for_bound_bots() {
        let (app, _bot) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        app.use_owned_middleware(
            "greeter",
            recorder(log.clone(), "owned", MiddlewareOutcome::Next),
            false,
            None,
        );
        app.use_middleware(recorder(log.clone(), "shared", MiddlewareOutcome::Next), false);

        app.dispatch(InboundEvent::private_message("10001", "42", "hi")).await;
        assert_eq!(*log.lock().unwrap(), vec!["shared"]);

        app.set_owner_bots("greeter", BTreeSet::from(["10001".to_string()]));
        app.dispatch(InboundEvent::private_message("10001", "42", "hi")).await;
        assert_eq!(*log.lock().unwrap(), vec!["shared", "owned", "shared"]);

        app.set_owner_bots("greeter", BTreeSet::new());
        assert!(!app.is_active_for(Some("greeter"), "10001"));
        assert!(app.is_active_for(None, "10001"));
    }

    #[test]
    fn test_strip_prefix() {
        let app = Dispatcher::new(DispatcherConfig::default());
        assert_eq!(app.strip_prefix("/help"), "help");
        assert_eq!(app.strip_prefix("help"), "help");
    }
}
