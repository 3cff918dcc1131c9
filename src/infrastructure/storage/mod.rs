//! File-based storage of per-bot enabled plugin sets

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

use crate::application::errors::StorageError;
use crate::domain::traits::PluginStore;

const PLUGINS_FILE: &str = "plugins.json";

/// JSON file store: `<base>/<bot_id>/plugins.json` holds an array of plugin names
pub struct JsonPluginStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonPluginStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    fn path_for(&self, bot_id: &str) -> PathBuf {
        self.base_path.join(bot_id).join(PLUGINS_FILE)
    }

    async fn read_set(&self, bot_id: &str) -> Vec<String> {
        let path = self.path_for(bot_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<String>>(&content) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Ignoring unreadable plugin set {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    async fn write_set(&self, bot_id: &str, names: &[String]) -> Result<(), StorageError> {
        let path = self.path_for(bot_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(names)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl PluginStore for JsonPluginStore {
    async fn load(&self, bot_id: &str) -> Vec<String> {
        self.read_set(bot_id).await
    }

    async fn add(&self, bot_id: &str, plugin: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut names = self.read_set(bot_id).await;
        if !names.iter().any(|n| n == plugin) {
            names.push(plugin.to_string());
        }
        self.write_set(bot_id, &names).await
    }

    async fn remove(&self, bot_id: &str, plugin: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut names = self.read_set(bot_id).await;
        names.retain(|n| n != plugin);
        self.write_set(bot_id, &names).await
    }
}

/// Volatile store, used when no data directory is configured
#[derive(Default)]
pub struct MemoryPluginStore {
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginStore for MemoryPluginStore {
    async fn load(&self, bot_id: &str) -> Vec<String> {
        let sets = self.sets.read().await;
        sets.get(bot_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn add(&self, bot_id: &str, plugin: &str) -> Result<(), StorageError> {
        let mut sets = self.sets.write().await;
        sets.entry(bot_id.to_string())
            .or_default()
            .insert(plugin.to_string());
        Ok(())
    }

    async fn remove(&self, bot_id: &str, plugin: &str) -> Result<(), StorageError> {
        let mut sets = self.sets.write().await;
        if let Some(set) = sets.get_mut(bot_id) {
            set.remove(plugin);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_remove_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPluginStore::new(dir.path());
        store.init().await.unwrap();

        assert!(store.load("10001").await.is_empty());
        store.add("10001", "echo").await.unwrap();
        store.add("10001", "weather").await.unwrap();
        store.add("10001", "echo").await.unwrap();
        assert_eq!(store.load("10001").await, vec!["echo", "weather"]);

        store.remove("10001", "echo").await.unwrap();
        assert_eq!(store.load("10001").await, vec!["weather"]);
        assert!(dir.path().join("10001").join(PLUGINS_FILE).is_file());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPluginStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("10001")).unwrap();
        std::fs::write(dir.path().join("10001").join(PLUGINS_FILE), "{not json").unwrap();

        assert!(store.load("10001").await.is_empty());
        store.add("10001", "echo").await.unwrap();
        assert_eq!(store.load("10001").await, vec!["echo"]);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryPluginStore::new();
        store.add("a", "echo").await.unwrap();
        store.remove("b", "echo").await.unwrap();
        assert_eq!(store.load("a").await, vec!["echo"]);
        assert!(store.load("b").await.is_empty());
    }
}
