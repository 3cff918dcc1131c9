//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::application::errors::ConfigError;

/// Runtime configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginConfig,
    pub supervisor: SupervisorConfig,
    pub delay: DelayConfig,
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PluginConfig {
    /// Custom plugin directory, searched first
    pub directory: PathBuf,
    /// Installed packages, searched after built-ins
    pub packages_dir: PathBuf,
    /// Organisation scope of official packages: `@<org>/plugin-<name>`
    pub org_scope: String,
    /// Prefix of community packages: `<prefix>-plugin-<name>`
    pub ecosystem_prefix: String,
    /// Where per-bot enabled sets are persisted
    pub data_dir: PathBuf,
    /// Plugins installed at startup
    pub entries: Vec<PluginEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginEntry {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SupervisorConfig {
    /// Value the worker announces in its start message
    pub auto_restart: bool,
    pub max_restarts: u32,
    pub restart_window_secs: u64,
    pub restart_delay_ms: u64,
}

impl SupervisorConfig {
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DelayConfig {
    /// Default wait for `prompt` answers
    pub prompt_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AdaptersConfig {
    pub console: Option<ConsoleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Bot id the console connection reports
    #[serde(default = "default_console_id")]
    pub self_id: String,
}

fn default_console_id() -> String {
    "console".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "plugbot".to_string(),
            prefix: "/".to_string(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./plugins"),
            packages_dir: PathBuf::from("./packages"),
            org_scope: "plugbot".to_string(),
            ecosystem_prefix: "plugbot".to_string(),
            data_dir: PathBuf::from("./data"),
            entries: Vec::new(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_restart: true,
            max_restarts: 5,
            restart_window_secs: 60,
            restart_delay_ms: 0,
        }
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self { prompt_ms: 60_000 }
    }
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            console: Some(ConsoleConfig {
                enabled: true,
                self_id: default_console_id(),
            }),
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `PLUGBOT_*` environment variables
    pub fn load_env() -> Self {
        let mut config = Config::default();

        if let Ok(prefix) = std::env::var("PLUGBOT_PREFIX") {
            config.bot.prefix = prefix;
        }

        if let Ok(dir) = std::env::var("PLUGBOT_PLUGIN_DIR") {
            config.plugins.directory = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("PLUGBOT_DATA_DIR") {
            config.plugins.data_dir = PathBuf::from(dir);
        }

        config
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::Parse(format!("Failed to write config: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supervisor.restart_window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "supervisor.restart-window-secs must be positive".to_string(),
            ));
        }
        if let Some(entry) = self.plugins.entries.iter().find(|e| e.name.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(format!(
                "plugin entry with empty name (config: {})",
                entry.config
            )));
        }
        Ok(())
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.delay.prompt_ms)
    }
}
