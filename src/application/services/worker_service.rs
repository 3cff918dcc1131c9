//! Worker process: wires configuration, dispatcher, plugins and bots, then runs the event loop

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::errors::{BotError, ChannelError, CommandError};
use crate::application::messaging::{Dispatcher, DispatcherConfig, Session};
use crate::domain::entities::{ChannelId, Command, InboundEvent};
use crate::domain::traits::{Bot, PluginStore};
use crate::infrastructure::adapters::ConsoleAdapter;
use crate::infrastructure::config::Config;
use crate::infrastructure::storage::JsonPluginStore;
use crate::infrastructure::supervisor::protocol::DownstreamMessage;
use crate::infrastructure::supervisor::{OutboundPayload, WorkerLink, RESTART_EXIT_CODE};
use crate::plugins::{builtin, PluginManager};

/// Exit code used when the worker stops on an interrupt
pub const INTERRUPT_EXIT_CODE: i32 = 130;

const EVENT_QUEUE: usize = 256;

pub struct WorkerService {
    config: Config,
    app: Arc<Dispatcher>,
    plugins: Arc<PluginManager>,
}

impl WorkerService {
    pub fn new(config: Config) -> Self {
        let app = Dispatcher::new(DispatcherConfig {
            prefix: config.bot.prefix.clone(),
            prompt_timeout: config.prompt_timeout(),
        });
        let store: Arc<dyn PluginStore> = Arc::new(JsonPluginStore::new(&config.plugins.data_dir));
        let plugins = Arc::new(PluginManager::new(
            config.plugins.clone(),
            app.clone(),
            Arc::new(builtin::loader()),
            store,
        ));
        Self {
            config,
            app,
            plugins,
        }
    }

    pub fn app(&self) -> &Arc<Dispatcher> {
        &self.app
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Run until interrupted or asked to restart. Returns the process exit code.
    pub async fn run(self) -> Result<i32, BotError> {
        let link = WorkerLink::connect_from_env().await?;
        let (link, mut downstream) = match link {
            Some((link, rx)) => (Some(Arc::new(link)), Some(rx)),
            None => {
                info!("Running without supervisor");
                (None, None)
            }
        };

        let (exit_tx, mut exit_rx) = mpsc::channel::<i32>(1);
        if let Some(link) = &link {
            self.app.register_command(restart_command(link.clone(), exit_tx.clone())?);
        }

        for e in self.plugins.load_from_config().await {
            debug!("Startup plugin failure: {}", e);
        }

        let (events_tx, mut events_rx) = mpsc::channel::<InboundEvent>(EVENT_QUEUE);
        let mut bots: Vec<Arc<dyn Bot>> = Vec::new();
        if let Some(console) = self.config.adapters.console.as_ref().filter(|c| c.enabled) {
            let bot: Arc<dyn Bot> = Arc::new(ConsoleAdapter::new(
                console.self_id.clone(),
                self.config.bot.name.clone(),
            ));
            bots.push(bot);
        }
        for bot in &bots {
            self.plugins.add_bot(bot.clone()).await;
            let bot = bot.clone();
            let events = events_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = bot.start(events).await {
                    error!("Bot {} stopped: {}", bot.self_id(), e);
                }
            });
        }
        drop(events_tx);

        if let Some(link) = &link {
            link.announce_start(self.config.supervisor.auto_restart).await?;
        }
        info!("{} ready with {} bot(s)", self.config.bot.name, bots.len());

        let code = loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    let app = self.app.clone();
                    tokio::spawn(async move { app.dispatch(event).await });
                }
                Some(message) = recv_downstream(&mut downstream) => match message {
                    DownstreamMessage::Send(payload) => self.deliver(payload).await,
                    DownstreamMessage::Shutdown => {
                        info!("Shutdown requested by supervisor");
                        break INTERRUPT_EXIT_CODE;
                    }
                },
                Some(code) = exit_rx.recv() => break code,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break INTERRUPT_EXIT_CODE;
                }
            }
        };

        for bot in bots {
            self.plugins.remove_bot(bot.self_id()).await;
            if let Err(e) = bot.stop().await {
                warn!("Failed to stop bot {}: {}", bot.self_id(), e);
            }
        }
        Ok(code)
    }

    /// Deliver a payload queued by a previous worker
    async fn deliver(&self, payload: serde_json::Value) {
        let payload: OutboundPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Ignoring replayed payload: {}", e);
                return;
            }
        };
        let Some(bot) = self.app.bot(&payload.bot_id) else {
            warn!("Replayed payload for unknown bot {}", payload.bot_id);
            return;
        };
        if let Err(e) = bot.send_message(&payload.channel, &payload.content, None).await {
            warn!("Failed to deliver replayed payload: {}", e);
        }
    }
}

async fn recv_downstream(
    downstream: &mut Option<mpsc::UnboundedReceiver<DownstreamMessage>>,
) -> Option<DownstreamMessage> {
    match downstream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// `restart` asks the supervisor for a fresh worker and confirms once it is up
fn restart_command(link: Arc<WorkerLink>, exit: mpsc::Sender<i32>) -> Result<Command, CommandError> {
    Ok(Command::new("restart")?
        .with_description("Restart the worker process")
        .with_handler(move |_action, session: Session| {
            let link = link.clone();
            let exit = exit.clone();
            async move {
                let channel: ChannelId = session
                    .channel_id()
                    .parse()
                    .map_err(|e: ChannelError| CommandError::ExecutionFailed(e.to_string()))?;
                let payload = OutboundPayload {
                    bot_id: session.self_id().to_string(),
                    channel,
                    content: "Restarted".to_string(),
                };
                let payload = serde_json::to_value(&payload)
                    .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
                link.queue(payload)
                    .await
                    .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
                if let Err(e) = session.reply("Restarting...").await {
                    warn!("Failed to confirm restart: {}", e);
                }
                let _ = exit.send(RESTART_EXIT_CODE).await;
                Ok::<_, CommandError>(None)
            }
        }))
}
