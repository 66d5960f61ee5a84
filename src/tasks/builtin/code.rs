use async_trait::async_trait;

use crate::command::ParsedCommand;
use crate::error::TaskError;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::shell::{execute, format_result, script_from};
use crate::tasks::builtin::subject;
use crate::tasks::task::{TaskContext, TaskHandler};

/// `python [code]`: run code with `code_interpreter -c`.
pub struct CodeTask;

#[async_trait]
impl TaskHandler for CodeTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let Some(code) = script_from(cmd) else {
            return Ok(OutgoingMessage::reply_to(
                msg,
                subject("CODE", "Main Menu"),
                format!(
                    "Usage: python [code]\nCode runs with {} -c.",
                    ctx.config.code_interpreter
                ),
            ));
        };

        let interpreter = ctx.config.code_interpreter.as_str();
        let workdir = ctx.config.file_roots.first().map(|p| p.as_path());
        tracing::info!(interpreter = %interpreter, sender = %msg.sender(), "Running code");

        let (output, exit_code) =
            execute(interpreter, &["-c", code.as_str()], workdir, ctx.config.handler_timeout()).await?;

        let status = if exit_code == 0 { "Completed" } else { "Failed" };
        Ok(OutgoingMessage::reply_to(
            msg,
            subject("CODE", status),
            format_result(&output, exit_code),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tasks::builtin::testing::{Fixture, message};

    // `sh -c` stands in for an interpreter so the test does not need python.
    #[cfg(unix)]
    #[tokio::test]
    async fn runs_with_interpreter() {
        let fx = Fixture::new(EngineConfig {
            code_interpreter: "sh".into(),
            ..EngineConfig::default()
        })
        .await;
        let reply = fx
            .run(&CodeTask, &message("code [echo $((6 * 7))]"))
            .await
            .unwrap();
        assert_eq!(reply.subject, "CODE: Completed");
        assert!(reply.body.contains("42"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_error() {
        let fx = Fixture::new(EngineConfig {
            code_interpreter: "definitely-not-an-interpreter".into(),
            ..EngineConfig::default()
        })
        .await;
        let err = fx
            .run(&CodeTask, &message("python [print(1)]"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn empty_code_is_usage() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let reply = fx.run(&CodeTask, &message("python")).await.unwrap();
        assert_eq!(reply.subject, "CODE: Main Menu");
    }
}
