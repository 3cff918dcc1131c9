//! Plugins bundled with the runtime

pub mod command_parser;
pub mod echo;

use crate::infrastructure::plugins::PluginLoader;

/// Module loader that knows every bundled plugin
pub fn loader() -> PluginLoader {
    PluginLoader::new()
        .with_builtin(command_parser::NAME, command_parser::exports)
        .with_builtin(echo::NAME, echo::exports)
}
