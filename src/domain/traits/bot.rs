use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::application::errors::BotError;
use crate::domain::entities::{ChannelId, InboundEvent};

/// Bot trait - abstraction over a live chat-protocol connection
#[async_trait]
pub trait Bot: Send + Sync {
    /// Stable identity of this connection, used as the binding key for plugins
    fn self_id(&self) -> &str;

    /// Get bot info
    fn bot_info(&self) -> BotInfo;

    /// Connection health
    fn status(&self) -> BotStatus;

    /// Start the connection and forward every inbound event to `events`
    async fn start(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), BotError>;

    /// Close the connection
    async fn stop(&self) -> Result<(), BotError> {
        Ok(())
    }

    /// Send a message to a channel, optionally quoting an earlier message id.
    /// Fails with `ChannelError::Unreachable` when the target cannot be addressed.
    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
        quote: Option<&str>,
    ) -> Result<MessageReceipt, BotError>;
}

/// Bot information
#[derive(Debug, Clone)]
pub struct BotInfo {
    pub id: String,
    pub name: String,
    pub platform: String,
}

/// Result of `Bot::status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotStatus {
    pub online: bool,
    pub healthy: bool,
}

/// Proof that a message was sent
#[derive(Debug, Clone)]
pub struct MessageReceipt {
    pub message_id: String,
    pub channel: ChannelId,
    pub sent_at: DateTime<Utc>,
}

impl MessageReceipt {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            channel,
            sent_at: Utc::now(),
        }
    }
}
