//! Session - per-event context handed to middleware, commands and plugins

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::dispatcher::Dispatcher;
use super::middleware::{middleware_fn, Middleware, MiddlewareId, MiddlewareOutcome};
use super::prompt::{PromptAnswer, PromptOptions};
use crate::application::argv::Action;
use crate::application::errors::BotError;
use crate::domain::entities::{ChannelId, EventKind, InboundEvent, Sender};
use crate::domain::traits::{Bot, MessageReceipt};

/// Bounds `$(...)` nesting and the number of expansions per level
const MAX_TEMPLATE_DEPTH: usize = 8;

/// Wraps one inbound event together with the bot that received it
#[derive(Clone)]
pub struct Session {
    app: Arc<Dispatcher>,
    bot: Arc<dyn Bot>,
    event: Arc<InboundEvent>,
}

impl Session {
    pub fn new(app: Arc<Dispatcher>, bot: Arc<dyn Bot>, event: InboundEvent) -> Self {
        Self {
            app,
            bot,
            event: Arc::new(event),
        }
    }

    pub fn app(&self) -> &Arc<Dispatcher> {
        &self.app
    }

    pub fn bot(&self) -> &Arc<dyn Bot> {
        &self.bot
    }

    pub fn event(&self) -> &InboundEvent {
        &self.event
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind
    }

    pub fn is_message(&self) -> bool {
        self.event.is_message()
    }

    pub fn self_id(&self) -> &str {
        &self.event.self_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.event.user_id.as_deref()
    }

    pub fn sender(&self) -> Option<&Sender> {
        self.event.sender.as_ref()
    }

    /// Message text, empty for non-message events
    pub fn content(&self) -> &str {
        self.event.content.as_deref().unwrap_or_default()
    }

    /// Reply address: `<message|notice|request type>:<group|discuss|user id>`
    pub fn channel_id(&self) -> String {
        let kind: Vec<&str> = [
            self.event.message_type.as_deref(),
            self.event.notice_type.as_deref(),
            self.event.request_type.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        let target = self
            .event
            .group_id
            .as_deref()
            .or(self.event.discuss_id.as_deref())
            .or(self.event.user_id.as_deref())
            .unwrap_or_default();
        format!("{}:{}", kind.join("."), target)
    }

    /// Scope key covering event kind, sub-kinds and every target id.
    /// Two sessions with equal keys come from the same conversation.
    pub fn from_url(&self) -> String {
        let kind: Vec<&str> = [
            Some(self.event.kind.as_str()),
            self.event.message_type.as_deref(),
            self.event.notice_type.as_deref(),
            self.event.request_type.as_deref(),
            self.event.sub_type.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        let target: Vec<&str> = [
            self.event.group_id.as_deref(),
            self.event.discuss_id.as_deref(),
            self.event.user_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        format!("{}:{}", kind.join("."), target.join("."))
    }

    pub async fn reply(&self, content: &str) -> Result<MessageReceipt, BotError> {
        let channel: ChannelId = self.channel_id().parse()?;
        self.bot.send_message(&channel, content, None).await
    }

    /// Reply quoting the message this session was created from
    pub async fn reply_quoted(&self, content: &str) -> Result<MessageReceipt, BotError> {
        let channel: ChannelId = self.channel_id().parse()?;
        self.bot
            .send_message(&channel, content, Some(&self.event.id))
            .await
    }

    /// Run a scoped middleware in front of the pipeline for messages from this conversation only.
    /// Matching sessions stop there. Remove it with `Dispatcher::remove_middleware`.
    pub fn middleware(&self, middleware: Arc<dyn Middleware>) -> MiddlewareId {
        let scope = self.from_url();
        self.app.use_middleware(
            middleware_fn(move |session: Session| {
                let middleware = middleware.clone();
                let in_scope = session.from_url() == scope;
                async move {
                    if !in_scope {
                        return MiddlewareOutcome::Next;
                    }
                    middleware.handle(&session).await;
                    MiddlewareOutcome::Stop
                }
            }),
            true,
        )
    }

    /// Ask a question and wait for the next message in this conversation.
    /// Returns `None` when nothing arrives before the timeout.
    pub async fn prompt(&self, question: &str, timeout: Option<Duration>) -> Option<String> {
        if let Err(e) = self.reply(question).await {
            tracing::warn!("[{}] Failed to send prompt: {}", self.channel_id(), e);
            return None;
        }
        let scope = self.from_url();
        let timeout = timeout.unwrap_or_else(|| self.app.config().prompt_timeout);
        self.app
            .wait_scoped(move |s| s.from_url() == scope, timeout, true)
            .await
            .map(|answer| answer.content().to_string())
    }

    /// Ask with validation and choices. An answer that fails the check gets the
    /// error message as a reply and the wait goes on until the timeout, which
    /// covers every attempt together.
    pub async fn ask(&self, options: &PromptOptions) -> Option<PromptAnswer> {
        if let Err(e) = self.reply(&options.question()).await {
            tracing::warn!("[{}] Failed to send prompt: {}", self.channel_id(), e);
            return None;
        }
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.app.config().prompt_timeout);
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let scope = self.from_url();
            let answer = self
                .app
                .wait_scoped(move |s| s.from_url() == scope, remaining, true)
                .await?;
            match options.accept(answer.content()) {
                Ok(value) => return Some(value),
                Err(message) => {
                    tracing::debug!("[{}] Rejected answer for {}", self.channel_id(), options.name);
                    if let Err(e) = answer.reply(&message).await {
                        tracing::warn!("[{}] Failed to send prompt error: {}", answer.channel_id(), e);
                    }
                }
            }
        }
    }

    /// Ask each question in turn, answers keyed by name.
    /// Stops with `None` at the first question left unanswered.
    pub async fn prompt_all(
        &self,
        questions: &[PromptOptions],
    ) -> Option<BTreeMap<String, PromptAnswer>> {
        let mut answers = BTreeMap::new();
        for options in questions {
            let answer = self.ask(options).await?;
            answers.insert(options.name.clone(), answer);
        }
        Some(answers)
    }

    /// Fill `$A` (everyone), `$a` (sender), `$m` (this bot) and `$s` (sender name),
    /// replace each `$(...)` with the output of the command inside, then run the
    /// result as a command. Returns the command output, or the expanded text
    /// when nothing replied. Never replies on its own.
    pub async fn execute_template(&self, template: &str) -> String {
        self.expand_template(template.to_string(), 0).await
    }

    fn expand_template(
        &self,
        template: String,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = String> + Send + '_>> {
        Box::pin(async move {
            let mut text = self.substitute(&template);
            if depth < MAX_TEMPLATE_DEPTH {
                for _ in 0..MAX_TEMPLATE_DEPTH {
                    let Some((start, end)) = nested_span(&text) else {
                        break;
                    };
                    let inner = text[start + 2..end].to_string();
                    let output = self.expand_template(inner, depth + 1).await;
                    text.replace_range(start..=end, &output);
                }
            }
            match self.execute(&text).await {
                MiddlewareOutcome::Reply(output) => output,
                MiddlewareOutcome::Next | MiddlewareOutcome::Stop => text,
            }
        })
    }

    fn substitute(&self, template: &str) -> String {
        let user = self.user_id().unwrap_or_default();
        let name = self
            .sender()
            .map(|sender| sender.display_name().to_string())
            .unwrap_or_else(|| user.to_string());
        template
            .replace("$A", "@all")
            .replace("$a", &format!("@{}", user))
            .replace("$m", &format!("@{}", self.self_id()))
            .replace("$s", &name)
    }

    /// Resolve `content` against the command table and run the matching command.
    /// Returns `Next` when no command matches.
    pub async fn execute(&self, content: &str) -> MiddlewareOutcome {
        let line = self.app.strip_prefix(content);
        let name = Action::parse(line).name;
        let Some(command) = self.app.find_command(&name, content) else {
            return MiddlewareOutcome::Next;
        };
        if !self.app.is_active_for(command.owner.as_deref(), self.self_id()) {
            tracing::debug!("[{}] {} is not enabled for this bot", self.channel_id(), command.name);
            return MiddlewareOutcome::Next;
        }
        let action = self.app.parse_command(&command, line);
        if let Some(error) = &action.error {
            tracing::debug!("[{}] {} rejected: {}", self.channel_id(), command.name, error);
            return MiddlewareOutcome::Reply(error.to_string());
        }
        tracing::debug!("[{}] Executing command {}", self.channel_id(), command.name);
        match command.execute(action, self.clone()).await {
            Ok(Some(reply)) => MiddlewareOutcome::Reply(reply),
            Ok(None) => MiddlewareOutcome::Stop,
            Err(e) => {
                tracing::warn!("[{}] Command {} failed: {}", self.channel_id(), command.name, e);
                MiddlewareOutcome::Reply(e.to_string())
            }
        }
    }
}

/// Byte span of the first `$(` and its balanced `)`
fn nested_span(text: &str) -> Option<(usize, usize)> {
    let start = text.find("$(")?;
    let mut depth = 0usize;
    for (i, c) in text[start + 1..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + 1 + i));
                }
            }
            _ => {}
        }
    }
    None
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("self_id", &self.event.self_id)
            .field("kind", &self.event.kind)
            .field("channel_id", &self.channel_id())
            .field("content", &self.event.content)
            .finish()
    }
}
