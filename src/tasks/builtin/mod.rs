//! Built-in tasks and the default task table.

mod code;
mod custom;
mod file;
mod gpt;
mod help;
mod manage;
mod request;
mod shell;

pub use code::CodeTask;
pub use custom::{CustomTask, UserTask, load_custom_tasks};
pub use file::{ReadFileTask, WriteFileTask};
pub use gpt::GptTask;
pub use help::HelpTask;
pub use manage::ManageTask;
pub use request::RequestTask;
pub use shell::ShellTask;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::tasks::registry::TaskRegistry;
use crate::tasks::task::{TaskDescriptor, TaskId};

/// Reply subject in the `TAG: status` form used by every task.
pub(crate) fn subject(tag: &str, status: &str) -> String {
    format!("{tag}: {status}")
}

/// The built-in table, in listing order.
pub fn default_tasks(config: &EngineConfig) -> Vec<TaskDescriptor> {
    let mut manage_triggers = vec!["0".to_string(), "manage".to_string()];
    if let Some(word) = config.instance_name.split_whitespace().next() {
        manage_triggers.push(word.to_lowercase());
    }

    vec![
        TaskDescriptor::new(
            TaskId::Help,
            "Help",
            ["?", "help", ""],
            "List every task with its triggers.",
            Arc::new(HelpTask),
        ),
        TaskDescriptor::new(
            TaskId::Manage,
            "System Management",
            manage_triggers,
            "status | freeze | unfreeze | stop | set <max_send_count:N> <scan_interval:SECS>",
            Arc::new(ManageTask),
        ),
        TaskDescriptor::new(
            TaskId::ReadFile,
            "Read File",
            ["1", "read"],
            "read [path]: send a file (directories are zipped).",
            Arc::new(ReadFileTask),
        ),
        TaskDescriptor::new(
            TaskId::WriteFile,
            "Write File",
            ["2", "write"],
            "write [dir]: save the attachments into a directory.",
            Arc::new(WriteFileTask),
        ),
        TaskDescriptor::new(
            TaskId::Request,
            "HTTP Request",
            ["3", "request"],
            "request [METHOD] [URL] [headers-json] [body]",
            Arc::new(RequestTask),
        ),
        TaskDescriptor::new(
            TaskId::Shell,
            "Shell",
            ["4", "shell", "powershell"],
            "shell [command]: run a shell command.",
            Arc::new(ShellTask),
        ),
        TaskDescriptor::new(
            TaskId::Code,
            "Code",
            ["5", "python", "code"],
            "python [code]: run code with the configured interpreter.",
            Arc::new(CodeTask),
        ),
        TaskDescriptor::new(
            TaskId::Gpt,
            "GPT",
            ["7", "gpt"],
            "gpt <model:..> <temperature:..> <max_tokens:..> question",
            Arc::new(GptTask),
        ),
        TaskDescriptor::new(
            TaskId::Custom,
            "Custom Tasks",
            ["9", "custom"],
            "custom <action:add|delete|list|load> <name:..> <trigger:a,b> <description:..> command [args]",
            Arc::new(CustomTask),
        ),
    ]
}

/// A registry holding the built-in table.
pub async fn default_registry(config: &EngineConfig) -> TaskRegistry {
    let registry = TaskRegistry::new();
    for task in default_tasks(config) {
        registry.register(task).await;
    }
    registry
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the built-in task tests.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::command::{ParsedCommand, parse};
    use crate::config::EngineConfig;
    use crate::engine::EngineState;
    use crate::error::{LlmError, TaskError};
    use crate::llm::{CompletionRequest, LlmClient};
    use crate::mail::{IncomingMessage, OutgoingMessage};
    use crate::tasks::registry::TaskRegistry;
    use crate::tasks::store::{CustomTaskSpec, CustomTaskStore};
    use crate::tasks::task::{TaskContext, TaskHandler};

    /// In-memory custom task store.
    #[derive(Default)]
    pub struct MemoryStore {
        pub specs: Mutex<Vec<CustomTaskSpec>>,
    }

    #[async_trait]
    impl CustomTaskStore for MemoryStore {
        async fn load(&self) -> Result<Vec<CustomTaskSpec>, TaskError> {
            Ok(self.specs.lock().unwrap().clone())
        }

        async fn save(&self, spec: &CustomTaskSpec) -> Result<(), TaskError> {
            let mut specs = self.specs.lock().unwrap();
            specs.retain(|s| s.name != spec.name);
            specs.push(spec.clone());
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<bool, TaskError> {
            let mut specs = self.specs.lock().unwrap();
            let before = specs.len();
            specs.retain(|s| s.name != name);
            Ok(specs.len() != before)
        }
    }

    /// Echoes the prompt back and records the request.
    #[derive(Default)]
    pub struct EchoLlm {
        pub last: Mutex<Option<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        fn default_model(&self) -> &str {
            "gpt-4"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, LlmError> {
            *self.last.lock().unwrap() = Some(request.clone());
            let n = request.n.unwrap_or(1) as usize;
            Ok(vec![format!("echo: {}", request.prompt); n])
        }
    }

    pub struct Fixture {
        pub config: EngineConfig,
        pub registry: TaskRegistry,
        pub state: EngineState,
        pub store: MemoryStore,
        pub llm: EchoLlm,
    }

    impl Fixture {
        pub async fn new(config: EngineConfig) -> Self {
            let registry = super::default_registry(&config).await;
            let state = EngineState::new(&config);
            Self {
                config,
                registry,
                state,
                store: MemoryStore::default(),
                llm: EchoLlm::default(),
            }
        }

        pub fn ctx(&self) -> TaskContext<'_> {
            TaskContext {
                registry: &self.registry,
                state: &self.state,
                config: &self.config,
                store: &self.store,
                llm: Some(&self.llm),
            }
        }

        /// Run `handler` on a message with the given body.
        pub async fn run(
            &self,
            handler: &dyn TaskHandler,
            msg: &IncomingMessage,
        ) -> Result<OutgoingMessage, TaskError> {
            let cmd: ParsedCommand = parse(&msg.command_text()).unwrap();
            handler.run(&self.ctx(), msg, &cmd).await
        }
    }

    pub fn message(body: &str) -> IncomingMessage {
        IncomingMessage::new("op@example.com", "cmd", body)
    }
}
