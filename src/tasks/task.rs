//! Task trait and descriptor types.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::ParsedCommand;
use crate::config::EngineConfig;
use crate::engine::EngineState;
use crate::error::TaskError;
use crate::llm::LlmClient;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::registry::TaskRegistry;
use crate::tasks::store::CustomTaskStore;

/// Identity of a task in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskId {
    Help,
    Manage,
    ReadFile,
    WriteFile,
    Request,
    Shell,
    Code,
    Gpt,
    Custom,
    /// A user-defined task, by name.
    User(String),
}

impl TaskId {
    /// Built-in tasks in listing order.
    pub const BUILTIN: [TaskId; 9] = [
        TaskId::Help,
        TaskId::Manage,
        TaskId::ReadFile,
        TaskId::WriteFile,
        TaskId::Request,
        TaskId::Shell,
        TaskId::Code,
        TaskId::Gpt,
        TaskId::Custom,
    ];

    /// Numeric trigger of a built-in task.
    pub fn number(&self) -> Option<&'static str> {
        match self {
            Self::Help => Some("?"),
            Self::Manage => Some("0"),
            Self::ReadFile => Some("1"),
            Self::WriteFile => Some("2"),
            Self::Request => Some("3"),
            Self::Shell => Some("4"),
            Self::Code => Some("5"),
            Self::Gpt => Some("7"),
            Self::Custom => Some("9"),
            Self::User(_) => None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::User(_))
    }

    /// Position in the listing order; user tasks sort after every built-in.
    pub fn rank(&self) -> usize {
        Self::BUILTIN
            .iter()
            .position(|id| id == self)
            .unwrap_or(Self::BUILTIN.len())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => write!(f, "help"),
            Self::Manage => write!(f, "manage"),
            Self::ReadFile => write!(f, "read_file"),
            Self::WriteFile => write!(f, "write_file"),
            Self::Request => write!(f, "request"),
            Self::Shell => write!(f, "shell"),
            Self::Code => write!(f, "code"),
            Self::Gpt => write!(f, "gpt"),
            Self::Custom => write!(f, "custom"),
            Self::User(name) => write!(f, "user:{name}"),
        }
    }
}

/// Everything a handler may read while it runs.
pub struct TaskContext<'a> {
    pub registry: &'a TaskRegistry,
    pub state: &'a EngineState,
    pub config: &'a EngineConfig,
    pub store: &'a dyn CustomTaskStore,
    pub llm: Option<&'a dyn LlmClient>,
}

/// A unit of work selected by a trigger keyword.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task and build the reply.
    ///
    /// Semantic validation (missing arguments, bad paths) is the handler's
    /// job; return an error and the dispatcher reports it to the sender.
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError>;
}

/// A registered task.
#[derive(Clone)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub name: String,
    /// Lower-cased, trimmed, de-duplicated.
    pub triggers: Vec<String>,
    pub description: String,
    pub handler: Arc<dyn TaskHandler>,
}

impl TaskDescriptor {
    pub fn new<I, S>(
        id: TaskId,
        name: impl Into<String>,
        triggers: I,
        description: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for trigger in triggers {
            let t = trigger.as_ref().trim().to_lowercase();
            if !normalized.contains(&t) {
                normalized.push(t);
            }
        }
        Self {
            id,
            name: name.into(),
            triggers: normalized,
            description: description.into(),
            handler,
        }
    }

    /// Whether `keyword` (already lower-cased) selects this task.
    pub fn matches(&self, keyword: &str) -> bool {
        self.triggers.iter().any(|t| t == keyword)
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn run(
            &self,
            _ctx: &TaskContext<'_>,
            msg: &IncomingMessage,
            _cmd: &ParsedCommand,
        ) -> Result<OutgoingMessage, TaskError> {
            Ok(OutgoingMessage::reply_to(msg, "noop", ""))
        }
    }

    #[test]
    fn triggers_are_normalized() {
        let d = TaskDescriptor::new(
            TaskId::ReadFile,
            "Read",
            ["1", " READ ", "read"],
            "",
            Arc::new(Noop),
        );
        assert_eq!(d.triggers, vec!["1", "read"]);
        assert!(d.matches("read"));
        assert!(!d.matches("READ"));
    }

    #[test]
    fn builtin_rank_order() {
        assert!(TaskId::Help.rank() < TaskId::Manage.rank());
        assert!(TaskId::Gpt.rank() < TaskId::Custom.rank());
        assert_eq!(TaskId::User("x".into()).rank(), TaskId::BUILTIN.len());
        assert_eq!(TaskId::Custom.number(), Some("9"));
        assert!(!TaskId::User("x".into()).is_builtin());
    }
}
