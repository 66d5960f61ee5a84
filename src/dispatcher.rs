//! Dispatcher: one inbound message in, exactly one reply out.
//!
//! Parsing, routing and handler failures all become error replies here; a
//! handler panic is caught as well, so nothing escapes to the poll loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use uuid::Uuid;

use crate::command::{ParsedCommand, parse};
use crate::config::EngineConfig;
use crate::engine::EngineState;
use crate::error::{CommandError, ErrorKind, TaskError};
use crate::llm::LlmClient;
use crate::mail::text::strip_quoted_text;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::subject;
use crate::tasks::{CustomTaskStore, TaskContext, TaskDescriptor, TaskId, TaskRegistry};

/// Routes parsed commands to tasks.
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    state: Arc<EngineState>,
    config: Arc<EngineConfig>,
    store: Arc<dyn CustomTaskStore>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        state: Arc<EngineState>,
        config: Arc<EngineConfig>,
        store: Arc<dyn CustomTaskStore>,
    ) -> Self {
        Self {
            registry,
            state,
            config,
            store,
            llm: None,
        }
    }

    /// Attach an LLM client for the gpt task.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Build the reply for one message. Never fails.
    pub async fn handle(&self, msg: &IncomingMessage) -> OutgoingMessage {
        let reply = match self.parse_body(msg) {
            Ok(cmd) => match self.route(&cmd).await {
                Ok(task) => self.run_task(&task, msg, &cmd).await,
                Err(e) => {
                    tracing::info!(sender = %msg.sender(), error = %e, "Unroutable command");
                    command_error_reply(msg, &e)
                }
            },
            Err(e) => {
                tracing::info!(sender = %msg.sender(), error = %e, "Malformed command");
                command_error_reply(msg, &e)
            }
        };
        reply.with_footer(&format!("email from {}", self.config.instance_name))
    }

    fn parse_body(&self, msg: &IncomingMessage) -> Result<ParsedCommand, CommandError> {
        let text = msg.command_text();
        if self.config.strip_quoted_replies {
            parse(&strip_quoted_text(&text))
        } else {
            parse(&text)
        }
    }

    /// Pick the task: management while frozen, else by keyword.
    async fn route(&self, cmd: &ParsedCommand) -> Result<Arc<TaskDescriptor>, CommandError> {
        let keyword = cmd.keyword();
        let task = if self.state.is_frozen() {
            self.registry.get(&TaskId::Manage).await
        } else {
            self.registry.resolve(&keyword).await
        };
        task.ok_or(CommandError::Unknown { keyword })
    }

    async fn run_task(
        &self,
        task: &TaskDescriptor,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> OutgoingMessage {
        let ctx = TaskContext {
            registry: &self.registry,
            state: &self.state,
            config: &self.config,
            store: self.store.as_ref(),
            llm: self.llm.as_deref(),
        };

        tracing::info!(task = %task.name, sender = %msg.sender(), "Dispatching");
        let outcome = AssertUnwindSafe(task.handler.run(&ctx, msg, cmd))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(mut reply) => {
                // replies always go back to the sender
                reply.to = msg.sender().to_string();
                reply
            }
            Err(e) => handler_error_reply(task, msg, &e),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Malformed => "Malformed command",
        ErrorKind::Unknown => "Unknown command",
        ErrorKind::Handler => "Task failed",
        ErrorKind::Transport => "Transport failure",
        ErrorKind::Validation => "Invalid message",
    }
}

fn command_error_reply(msg: &IncomingMessage, err: &CommandError) -> OutgoingMessage {
    let kind = crate::error::Error::from(err.clone()).kind();
    let hint = match err {
        CommandError::Malformed { .. } => {
            "Brackets must be balanced; escape a literal bracket with a backslash."
        }
        CommandError::Unknown { .. } => "Send `help` for the list of commands.",
    };
    OutgoingMessage::reply_to(
        msg,
        subject("ERROR", kind_label(kind)),
        format!("Error: {err}\n\n{hint}"),
    )
}

fn handler_error_reply(task: &TaskDescriptor, msg: &IncomingMessage, err: &TaskError) -> OutgoingMessage {
    let incident = Uuid::new_v4();
    tracing::error!(
        task = %task.name,
        sender = %msg.sender(),
        incident = %incident,
        error = %err,
        "Task failed"
    );

    let mut body = format!("Error: {err}\n\nTask: {}", task.name);
    let mut source = std::error::Error::source(err);
    if source.is_some() {
        body.push_str("\nCaused by:");
    }
    while let Some(cause) = source {
        body.push_str(&format!("\n  - {cause}"));
        source = cause.source();
    }
    body.push_str(&format!("\nIncident: {incident}"));

    OutgoingMessage::reply_to(msg, subject("ERROR", kind_label(ErrorKind::Handler)), body)
}
