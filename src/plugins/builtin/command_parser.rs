//! Routes messages to the command table and provides `help`

use crate::application::errors::CommandError;
use crate::application::messaging::{middleware_fn, MiddlewareOutcome, Session};
use crate::domain::entities::Command;
use crate::plugins::{ExportTable, PluginContext};

pub const NAME: &str = "command-parser";

pub fn exports() -> ExportTable {
    ExportTable::new().on_install(|ctx: PluginContext, _config| async move {
        ctx.middleware(
            middleware_fn(|session: Session| async move {
                if !session.is_message() {
                    return MiddlewareOutcome::Next;
                }
                let content = session.content().to_string();
                session.execute(&content).await
            }),
            false,
        );
        ctx.command(help().map_err(|e| e.to_string())?);
        Ok::<(), String>(())
    })
}

fn help() -> Result<Command, CommandError> {
    Ok(Command::new("help [command]")?
        .with_description("Show available commands")
        .with_handler(|action, session: Session| async move {
            let app = session.app();
            let help = app.command_help(session.self_id());
            if let Some(wanted) = action.arg("command").and_then(|v| v.as_str()) {
                let found = app
                    .find_command(wanted, wanted)
                    .filter(|c| app.is_active_for(c.owner.as_deref(), session.self_id()));
                return match found {
                    Some(command) => Ok(Some(match &command.description {
                        Some(desc) => format!("{}\n{}", command.usage, desc),
                        None => command.usage.clone(),
                    })),
                    None => Err(CommandError::ExecutionFailed(format!(
                        "unknown command {}",
                        wanted
                    ))),
                };
            }
            let lines: Vec<String> = help
                .into_iter()
                .map(|(usage, desc)| match desc {
                    Some(desc) => format!("{}  {}", usage, desc),
                    None => usage,
                })
                .collect();
            Ok(Some(lines.join("\n")))
        }))
}
