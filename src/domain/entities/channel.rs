use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::application::errors::ChannelError;

/// Kind of addressable destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Private,
    Group,
    Discuss,
}

impl ChannelKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelKind::Private => "private",
            ChannelKind::Group => "group",
            ChannelKind::Discuss => "discuss",
        }
    }
}

/// A message destination, written `kind:id` (e.g. `group:1234`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    pub kind: ChannelKind,
    pub id: String,
}

impl ChannelId {
    pub fn new(kind: ChannelKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self::new(ChannelKind::Private, id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(ChannelKind::Group, id)
    }

    pub fn discuss(id: impl Into<String>) -> Self {
        Self::new(ChannelKind::Discuss, id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for ChannelId {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ChannelError::Invalid(s.to_string()))?;
        if id.is_empty() {
            return Err(ChannelError::Invalid(s.to_string()));
        }
        let kind = match kind {
            "private" => ChannelKind::Private,
            "group" => ChannelKind::Group,
            "discuss" => ChannelKind::Discuss,
            _ => return Err(ChannelError::Invalid(s.to_string())),
        };
        Ok(Self::new(kind, id))
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ChannelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.to_string()
    }
}
