use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Sender;

/// Top-level kind of a protocol event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Message,
    Notice,
    Request,
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Message => "message",
            EventKind::Notice => "notice",
            EventKind::Request => "request",
        }
    }
}

/// Raw event emitted by a bot connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub kind: EventKind,
    /// Identity of the bot that received the event
    pub self_id: String,
    /// `private`, `group` or `discuss` for message events
    pub message_type: Option<String>,
    pub notice_type: Option<String>,
    pub request_type: Option<String>,
    pub sub_type: Option<String>,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub discuss_id: Option<String>,
    pub content: Option<String>,
    pub sender: Option<Sender>,
    pub timestamp: DateTime<Utc>,
    pub raw: Option<serde_json::Value>,
}

impl InboundEvent {
    pub fn new(kind: EventKind, self_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            self_id: self_id.into(),
            message_type: None,
            notice_type: None,
            request_type: None,
            sub_type: None,
            user_id: None,
            group_id: None,
            discuss_id: None,
            content: None,
            sender: None,
            timestamp: Utc::now(),
            raw: None,
        }
    }

    pub fn private_message(
        self_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        let mut event = Self::new(EventKind::Message, self_id);
        event.message_type = Some("private".to_string());
        event.sender = Some(Sender::new(user_id.clone()));
        event.user_id = Some(user_id);
        event.content = Some(content.into());
        event
    }

    pub fn group_message(
        self_id: impl Into<String>,
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        let mut event = Self::new(EventKind::Message, self_id);
        event.message_type = Some("group".to_string());
        event.group_id = Some(group_id.into());
        event.sender = Some(Sender::new(user_id.clone()));
        event.user_id = Some(user_id);
        event.content = Some(content.into());
        event
    }

    pub fn notice(self_id: impl Into<String>, notice_type: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::Notice, self_id);
        event.notice_type = Some(notice_type.into());
        event
    }

    pub fn request(self_id: impl Into<String>, request_type: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::Request, self_id);
        event.request_type = Some(request_type.into());
        event
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn is_message(&self) -> bool {
        self.kind == EventKind::Message
    }
}
