//! Domain traits - Abstractions for infrastructure implementations

pub mod bot;
pub mod store;

pub use bot::{Bot, BotInfo, BotStatus, MessageReceipt};
pub use store::PluginStore;
