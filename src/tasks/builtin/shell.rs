//! Shell execution task.
//!
//! Runs the command through the configured shell program with:
//! - Working directory set to the first file root
//! - Timeout enforcement
//! - Output capture and truncation

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::command::ParsedCommand;
use crate::error::TaskError;
use crate::mail::text::truncate;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::subject;
use crate::tasks::task::{TaskContext, TaskHandler};

/// Maximum output size before truncation (64KB).
pub(crate) const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Flag that makes `program` run its next argument as a script.
pub(crate) fn inline_flag(program: &str) -> &'static str {
    // Both separators, so Windows paths are recognised on any host.
    let base = program.rsplit(['/', '\\']).next().unwrap_or(program);
    let name = base.to_lowercase();
    match name.trim_end_matches(".exe") {
        "cmd" => "/C",
        "powershell" | "pwsh" => "-Command",
        _ => "-c",
    }
}

/// Run `program args...`, capturing stdout and stderr.
pub(crate) async fn execute(
    program: &str,
    args: &[&str],
    workdir: Option<&Path>,
    timeout: Duration,
) -> Result<(String, i32), TaskError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }

    let child = command
        .spawn()
        .map_err(|e| TaskError::ExecutionFailed(format!("Failed to spawn {program}: {e}")))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| TaskError::Timeout(timeout))??;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let combined = if stderr.is_empty() {
        stdout
    } else if stdout.is_empty() {
        stderr
    } else {
        format!("{stdout}\n\n--- stderr ---\n{stderr}")
    };

    Ok((
        truncate(&combined, MAX_OUTPUT_SIZE),
        output.status.code().unwrap_or(-1),
    ))
}

/// Script from `[arg]`, else the plain text after the keyword.
pub(crate) fn script_from(cmd: &ParsedCommand) -> Option<String> {
    cmd.first_arg()
        .map(str::to_string)
        .or_else(|| Some(cmd.text_after_keyword()))
        .filter(|s| !s.trim().is_empty())
}

pub(crate) fn format_result(output: &str, exit_code: i32) -> String {
    let output = if output.trim().is_empty() {
        "(no output)"
    } else {
        output
    };
    format!("Exit code: {exit_code}\n\n{output}")
}

/// `shell [command]`: run a shell command.
pub struct ShellTask;

#[async_trait]
impl TaskHandler for ShellTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let Some(script) = script_from(cmd) else {
            return Ok(OutgoingMessage::reply_to(
                msg,
                subject("SHELL", "Main Menu"),
                "Usage: shell [command]  or  shell command",
            ));
        };

        let program = if cmd.keyword() == "powershell" {
            "powershell"
        } else {
            ctx.config.shell_program.as_str()
        };
        let workdir = ctx.config.file_roots.first().map(|p| p.as_path());

        tracing::info!(program = %program, sender = %msg.sender(), "Running shell command");
        let (output, code) = execute(
            program,
            &[inline_flag(program), script.as_str()],
            workdir,
            ctx.config.handler_timeout(),
        )
        .await?;

        let status = if code == 0 { "Completed" } else { "Failed" };
        Ok(OutgoingMessage::reply_to(
            msg,
            subject("SHELL", status),
            format_result(&output, code),
        ))
    }
}
