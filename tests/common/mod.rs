#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use plugbot::application::errors::BotError;
use plugbot::domain::entities::{ChannelId, InboundEvent};
use plugbot::domain::traits::{Bot, BotInfo, BotStatus, MessageReceipt};

/// Bot that records every message it is asked to send
pub struct RecordingBot {
    id: String,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingBot {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, content)| content).collect()
    }
}

#[async_trait]
impl Bot for RecordingBot {
    fn self_id(&self) -> &str {
        &self.id
    }

    fn bot_info(&self) -> BotInfo {
        BotInfo {
            id: self.id.clone(),
            name: "recording".to_string(),
            platform: "test".to_string(),
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
