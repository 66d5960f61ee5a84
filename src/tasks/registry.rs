//! Task registry: ordered task list plus a keyword index.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::tasks::task::{TaskDescriptor, TaskId};

#[derive(Default)]
struct Inner {
    /// Built-ins first in fixed order, then user tasks in registration order.
    tasks: Vec<Arc<TaskDescriptor>>,
    /// Keyword -> task name. The most recent registration of a keyword wins.
    index: HashMap<String, String>,
}

impl Inner {
    fn position(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.name == name)
    }

    /// Rebuild keyword ownership for `keyword` after its owner went away.
    fn reassign(&mut self, keyword: &str) {
        match self.tasks.iter().rev().find(|t| t.matches(keyword)) {
            Some(task) => {
                self.index.insert(keyword.to_string(), task.name.clone());
            }
            None => {
                self.index.remove(keyword);
            }
        }
    }
}

/// Registry of available tasks.
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a task, replacing any task with the same name.
    ///
    /// Keywords already owned by another task are taken over.
    pub async fn register(&self, task: TaskDescriptor) {
        let task = Arc::new(task);
        let mut inner = self.inner.write().await;

        if let Some(pos) = inner.position(&task.name) {
            let old = inner.tasks.remove(pos);
            for keyword in &old.triggers {
                if inner.index.get(keyword) == Some(&old.name) {
                    inner.index.remove(keyword);
                }
            }
        }

        for keyword in &task.triggers {
            if let Some(previous) = inner.index.get(keyword)
                && *previous != task.name
            {
                tracing::warn!(
                    keyword = %keyword,
                    previous = %previous,
                    task = %task.name,
                    "Trigger re-registered; latest task wins"
                );
            }
            inner.index.insert(keyword.clone(), task.name.clone());
        }

        let rank = task.id.rank();
        let at = inner
            .tasks
            .iter()
            .position(|t| t.id.rank() > rank)
            .unwrap_or(inner.tasks.len());
        tracing::debug!(task = %task.name, id = %task.id, "Registered task");
        inner.tasks.insert(at, task);
    }

    /// Remove a task by name.
    pub async fn unregister(&self, name: &str) -> Option<Arc<TaskDescriptor>> {
        let mut inner = self.inner.write().await;
        let pos = inner.position(name)?;
        let removed = inner.tasks.remove(pos);
        for keyword in &removed.triggers {
            if inner.index.get(keyword) == Some(&removed.name) {
                inner.reassign(keyword);
            }
        }
        tracing::debug!(task = %name, "Unregistered task");
        Some(removed)
    }

    /// Resolve a keyword (case-insensitive) to its task.
    pub async fn resolve(&self, keyword: &str) -> Option<Arc<TaskDescriptor>> {
        let keyword = keyword.trim().to_lowercase();
        let inner = self.inner.read().await;
        let name = inner.index.get(&keyword)?;
        inner.tasks.iter().find(|t| t.name == *name).cloned()
    }

    /// Find the task with the given id.
    pub async fn get(&self, id: &TaskId) -> Option<Arc<TaskDescriptor>> {
        self.inner
            .read()
            .await
            .tasks
            .iter()
            .find(|t| t.id == *id)
            .cloned()
    }

    /// All tasks, built-ins first.
    pub async fn list(&self) -> Vec<Arc<TaskDescriptor>> {
        self.inner.read().await.tasks.clone()
    }

    /// Get the number of registered tasks.
    pub async fn count(&self) -> usize {
        self.inner.read().await.tasks.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ParsedCommand;
    use crate::error::TaskError;
    use crate::mail::{IncomingMessage, OutgoingMessage};
    use crate::tasks::task::{TaskContext, TaskHandler};
    use async_trait::async_trait;

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

    fn task(id: TaskId, name: &str, triggers: &[&str]) -> TaskDescriptor {
        TaskDescriptor::new(id, name, triggers.iter(), "", Arc::new(Noop))
    }

    fn names(tasks: &[Arc<TaskDescriptor>]) -> Vec<&str> {
        tasks.iter().map(|t| t.name.as_str()).collect()
    }

    #[tokio::test]
    async fn resolve_is_case_insensitive() {
        let reg = TaskRegistry::new();
        reg.register(task(TaskId::ReadFile, "Read File", &["1", "read"]))
            .await;

        assert_eq!(reg.resolve("READ").await.unwrap().name, "Read File");
        assert_eq!(reg.resolve("1").await.unwrap().id, TaskId::ReadFile);
        assert!(reg.resolve("write").await.is_none());
    }

    #[tokio::test]
    async fn later_registration_wins_overlap() {
        let reg = TaskRegistry::new();
        reg.register(task(TaskId::User("a".into()), "a", &["go", "alpha"]))
            .await;
        reg.register(task(TaskId::User("b".into()), "b", &["go"])).await;

        assert_eq!(reg.resolve("go").await.unwrap().name, "b");
        assert_eq!(reg.resolve("alpha").await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn unregister_hands_keyword_back() {
        let reg = TaskRegistry::new();
        reg.register(task(TaskId::Shell, "Shell", &["4", "shell"]))
            .await;
        reg.register(task(TaskId::User("sh".into()), "sh", &["shell"]))
            .await;
        assert_eq!(reg.resolve("shell").await.unwrap().name, "sh");

        assert!(reg.unregister("sh").await.is_some());
        assert_eq!(reg.resolve("shell").await.unwrap().name, "Shell");
        assert!(reg.unregister("sh").await.is_none());
    }

    #[tokio::test]
    async fn list_keeps_builtins_first() {
        let reg = TaskRegistry::new();
        reg.register(task(TaskId::User("mine".into()), "mine", &["mine"]))
            .await;
        reg.register(task(TaskId::Gpt, "GPT", &["7"])).await;
        reg.register(task(TaskId::Help, "Help", &["?"])).await;
        reg.register(task(TaskId::User("other".into()), "other", &["o"]))
            .await;

        assert_eq!(names(&reg.list().await), vec!["Help", "GPT", "mine", "other"]);
        assert_eq!(reg.count().await, 4);
    }

    #[tokio::test]
    async fn reregistering_same_name_replaces() {
        let reg = TaskRegistry::new();
        reg.register(task(TaskId::User("x".into()), "x", &["old"])).await;
        reg.register(task(TaskId::User("x".into()), "x", &["new"])).await;

        assert_eq!(reg.count().await, 1);
        assert!(reg.resolve("old").await.is_none());
        assert_eq!(reg.resolve("new").await.unwrap().name, "x");
    }
}
