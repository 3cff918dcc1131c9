use std::fmt;

use serde::{Deserialize, Serialize};

/// Who sent an inbound event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: String,
    pub nickname: Option<String>,
    /// Group card name, preferred over the nickname when present
    pub card: Option<String>,
    pub title: Option<String>,
}

impl Sender {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_card(mut self, card: impl Into<String>) -> Self {
        self.card = Some(card.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.card
            .as_deref()
            .or(self.title.as_deref())
            .or(self.nickname.as_deref())
            .unwrap_or(&self.user_id)
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
