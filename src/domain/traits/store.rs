use async_trait::async_trait;

use crate::application::errors::StorageError;

/// Durable per-bot set of enabled plugin names
#[async_trait]
pub trait PluginStore: Send + Sync {
    /// Names enabled for `bot_id`. A missing or unreadable set is empty.
    async fn load(&self, bot_id: &str) -> Vec<String>;

    /// Read, add `plugin`, write back
    async fn add(&self, bot_id: &str, plugin: &str) -> Result<(), StorageError>;

    /// Read, remove `plugin`, write back
    async fn remove(&self, bot_id: &str, plugin: &str) -> Result<(), StorageError>;
}
