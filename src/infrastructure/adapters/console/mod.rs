//! Console adapter for development/testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::application::errors::{BotError, ChannelError};
use crate::domain::entities::{ChannelId, ChannelKind, InboundEvent};
use crate::domain::traits::{Bot, BotInfo, BotStatus, MessageReceipt};

/// User id given to everything typed on stdin
pub const CONSOLE_USER: &str = "console-user";

/// Console bot adapter: stdin lines are private messages, replies go to stdout
pub struct ConsoleAdapter {
    info: BotInfo,
    online: AtomicBool,
}

impl ConsoleAdapter {
    pub fn new(self_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: BotInfo {
                id: self_id.into(),
                name: name.into(),
                platform: "console".to_string(),
            },
            online: AtomicBool::new(false),
        }
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new("console", "plugbot")
    }
}

#[async_trait]
impl Bot for ConsoleAdapter {
    fn self_id(&self) -> &str {
        &self.info.id
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }

    fn status(&self) -> BotStatus {
        let online = self.online.load(Ordering::Relaxed);
        BotStatus {
            online,
            healthy: online,
        }
    }

    async fn start(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), BotError> {
        tracing::info!("Starting console bot (dev mode)");
        self.online.store(true, Ordering::Relaxed);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event = InboundEvent::private_message(self.info.id.clone(), CONSOLE_USER, line);
            if events.send(event).await.is_err() {
                break;
            }
        }

        self.online.store(false, Ordering::Relaxed);
        tracing::info!("Console input closed");
        Ok(())
    }

    async fn stop(&self) -> Result<(), BotError> {
        self.online.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
        _quote: Option<&str>,
    ) -> Result<MessageReceipt, BotError> {
        if channel.kind != ChannelKind::Private {
            return Err(ChannelError::Unreachable(channel.to_string()).into());
        }
        println!("[BOT] {}", content);
        Ok(MessageReceipt::new(channel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_only_reaches_private_channels() {
        let bot = ConsoleAdapter::default();
        assert!(bot
            .send_message(&ChannelId::private(CONSOLE_USER), "hi", None)
            .await
            .is_ok());
        let err = bot
            .send_message(&ChannelId::group("1"), "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Channel(ChannelError::Unreachable(_))));
        assert!(!bot.status().online);
    }
}
