use async_trait::async_trait;

use crate::command::ParsedCommand;
use crate::error::TaskError;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::subject;
use crate::tasks::task::{TaskContext, TaskHandler};

/// Lists every registered task.
pub struct HelpTask;

#[async_trait]
impl TaskHandler for HelpTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        _cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let mut body = format!("{} understands these commands:\n", ctx.config.instance_name);
        for task in ctx.registry.list().await {
            let triggers: Vec<&str> = task
                .triggers
                .iter()
                .map(String::as_str)
                .filter(|t| !t.is_empty())
                .collect();
            body.push_str(&format!("\n[{}] {}", triggers.join(", "), task.name));
            if !task.description.is_empty() {
                body.push_str(&format!("\n    {}", task.description));
            }
        }
        body.push_str(
            "\n\nArguments go in [square brackets], settings in <key:value>; \
             escape a literal bracket with a backslash.",
        );
        Ok(OutgoingMessage::reply_to(msg, subject("HELP", "Main Menu"), body))
    }
}
