use std::time::Duration;

use async_trait::async_trait;

use crate::command::ParsedCommand;
use crate::error::TaskError;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::subject;
use crate::tasks::task::{TaskContext, TaskHandler};

const TAG: &str = "MANAGE";
const SUBCOMMANDS: &str = "status, freeze, unfreeze, stop, set <max_send_count:N> <scan_interval:SECS>";

/// Self-administration. Always reachable, even while frozen.
pub struct ManageTask;

#[async_trait]
impl TaskHandler for ManageTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let state = ctx.state;
        let sub = cmd
            .first_arg()
            .map(|a| a.trim().to_lowercase())
            .unwrap_or_else(|| "status".to_string());

        let (status, body) = match sub.as_str() {
            "status" => ("Status", state.snapshot().to_string()),
            "freeze" => {
                state.freeze();
                tracing::info!(sender = %msg.sender(), "Frozen by request");
                ("Frozen", "Only management commands are accepted until unfreeze.".into())
            }
            "unfreeze" => {
                state.unfreeze();
                tracing::info!(sender = %msg.sender(), "Unfrozen by request");
                ("Unfrozen", "Normal dispatch resumed; send counter reset.".into())
            }
            "stop" => {
                state.stop();
                tracing::info!(sender = %msg.sender(), "Stop requested");
                ("Stopping", "The engine stops after this reply.".into())
            }
            "set" => ("Updated", apply_settings(ctx, cmd)?),
            other => (
                "Unknown command",
                format!("Unknown management command {other:?}.\nAvailable: {SUBCOMMANDS}"),
            ),
        };

        let mut body = body;
        if state.is_frozen() && sub != "freeze" {
            body.push_str("\n\nEngine is frozen: send `manage [unfreeze]` to resume.");
        }
        Ok(OutgoingMessage::reply_to(msg, subject(TAG, status), body))
    }
}

fn apply_settings(ctx: &TaskContext<'_>, cmd: &ParsedCommand) -> Result<String, TaskError> {
    let mut applied = Vec::new();

    if let Some(raw) = cmd.setting("max_send_count") {
        let max: i64 = raw
            .parse()
            .map_err(|_| TaskError::invalid("manage", format!("max_send_count {raw:?} is not an integer")))?;
        ctx.state.set_max_send_count(max);
        applied.push(format!("max_send_count = {max}"));
    }

    if let Some(raw) = cmd.setting("scan_interval") {
        let secs: f64 = raw
            .parse()
            .map_err(|_| TaskError::invalid("manage", format!("scan_interval {raw:?} is not a number")))?;
        let interval = Duration::try_from_secs_f64(secs)
            .map_err(|_| TaskError::invalid("manage", format!("scan_interval {raw:?} is out of range")))?;
        ctx.state.set_scan_interval(interval);
        applied.push(format!("scan_interval = {secs}s"));
    }

    if applied.is_empty() {
        return Err(TaskError::invalid(
            "manage",
            "set needs <max_send_count:N> and/or <scan_interval:SECS>",
        ));
    }
    Ok(applied.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tasks::builtin::testing::{Fixture, message};

    #[tokio::test]
    async fn status_is_default() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let reply = fx.run(&ManageTask, &message("manage")).await.unwrap();
        assert_eq!(reply.subject, "MANAGE: Status");
        assert!(reply.body.contains("Name: Emalia"));
        assert!(reply.body.contains("Max send count: unlimited"));
    }

    #[tokio::test]
    async fn freeze_and_unfreeze() {
        let fx = Fixture::new(EngineConfig::default()).await;
        fx.run(&ManageTask, &message("manage [freeze]")).await.unwrap();
        assert!(fx.state.is_frozen());

        let reply = fx.run(&ManageTask, &message("0 [UNFREEZE]")).await.unwrap();
        assert_eq!(reply.subject, "MANAGE: Unfrozen");
        assert!(!fx.state.is_frozen());
    }

    #[tokio::test]
    async fn stop_clears_running() {
        let fx = Fixture::new(EngineConfig::default()).await;
        fx.state.try_start(Duration::from_secs(1));
        fx.run(&ManageTask, &message("manage [stop]")).await.unwrap();
        assert!(!fx.state.is_running());
    }

    #[tokio::test]
    async fn set_applies_limits() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let reply = fx
            .run(
                &ManageTask,
                &message("manage [set] <max_send_count:3> <scan_interval:0.5>"),
            )
            .await
            .unwrap();
        assert_eq!(reply.subject, "MANAGE: Updated");
        assert_eq!(fx.state.max_send_count(), 3);
        assert_eq!(fx.state.scan_interval(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn set_rejects_garbage() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let err = fx
            .run(&ManageTask, &message("manage [set] <max_send_count:lots>"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn unknown_subcommand_is_reported() {
        let fx = Fixture::new(EngineConfig::default()).await;
        fx.state.freeze();
        let reply = fx.run(&ManageTask, &message("read [x]")).await.unwrap();
        assert_eq!(reply.subject, "MANAGE: Unknown command");
        assert!(reply.body.contains("\"x\""));
        assert!(reply.body.contains("frozen"));
    }
}
