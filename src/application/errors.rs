//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Plugin lifecycle errors. Always carries a human-readable cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin '{0}' could not be found")]
    NotFound(String),

    #[error("plugin '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("plugin '{plugin}' is already enabled for bot {bot}")]
    AlreadyEnabled { plugin: String, bot: String },

    #[error("plugin '{plugin}' is not enabled for bot {bot}")]
    NotEnabled { plugin: String, bot: String },

    #[error("plugin '{plugin}' does not export an {hook} hook")]
    MissingHook { plugin: String, hook: &'static str },

    #[error("plugin '{plugin}' failed in {hook}: {cause}")]
    Hook {
        plugin: String,
        hook: &'static str,
        cause: String,
    },

    #[error("failed to load plugin: {0}")]
    Load(String),

    #[error("failed to restart plugin '{plugin}': {cause}")]
    Restart { plugin: String, cause: String },
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Parser errors. These are attached to a parsed action, never thrown across dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgvError {
    #[error("invalid {kind} ({name}): {message} ({input})")]
    InvalidValue {
        kind: SlotKind,
        name: String,
        message: String,
        input: String,
    },

    #[error("missing required {kind} ({name})")]
    MissingRequiredArgument { kind: SlotKind, name: String },

    #[error("unknown option ({0})")]
    UnknownOption(String),
}

/// Which kind of slot a parser error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Argument,
    Option,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKind::Argument => write!(f, "argument"),
            SlotKind::Option => write!(f, "option"),
        }
    }
}

/// Send target errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid channel id: {0}")]
    Invalid(String),

    #[error("channel {0} is not reachable")]
    Unreachable(String),
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid declaration: {0}")]
    Declaration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Permission denied")]
    PermissionDenied,
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Worker supervision errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("control channel error: {0}")]
    Channel(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
