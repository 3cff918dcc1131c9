//! Domain entities - Core business objects

pub mod channel;
pub mod command;
pub mod event;
pub mod user;

pub use channel::{ChannelId, ChannelKind};
pub use command::{Command, CommandHandler, CommandTable, KeepAlive, Shortcut};
pub use event::{EventKind, InboundEvent};
pub use user::Sender;
