//! Domain layer - Core business objects and the abstractions adapters implement
//!
//! This layer contains:
//! - Entities: Channels, inbound events, senders, commands
//! - Traits: Abstractions for infrastructure (Bot, PluginStore)

pub mod entities;
pub mod traits;
