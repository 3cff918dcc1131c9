//! `echo <message>` - replies with its argument

use crate::domain::entities::Command;
use crate::plugins::ExportTable;

pub const NAME: &str = "echo";

pub fn exports() -> ExportTable {
    ExportTable::new()
        .on_install(|ctx, _config| async move {
            let command = Command::new("echo <message:text>")
                .map_err(|e| e.to_string())?
                .with_description("Repeat a message")
                .with_alias("say")
                .with_handler(|action, _session| async move {
                    Ok(action.arg("message").map(|v| v.to_string()))
                });
            ctx.command(command);
            Ok::<(), String>(())
        })
        .on_enable(|bot| async move {
            tracing::debug!("echo ready for bot {}", bot.self_id());
            Ok(())
        })
}
