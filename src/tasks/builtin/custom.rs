//! User-defined tasks: stored command bodies replayed against a built-in task.

use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{ParsedCommand, parse};
use crate::error::TaskError;
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::subject;
use crate::tasks::registry::TaskRegistry;
use crate::tasks::store::{CustomTaskSpec, CustomTaskStore};
use crate::tasks::task::{TaskContext, TaskDescriptor, TaskHandler, TaskId};

const TAG: &str = "TASK";
const USAGE: &str = "Usage:\n\
custom <action:add> <name:NAME> <trigger:a,b> <description:TEXT> command [args]\n\
custom <action:delete> <name:NAME>\n\
custom <action:list>\n\
custom <action:load>";

/// Resolve the built-in task a stored command targets.
async fn target_of(
    registry: &TaskRegistry,
    command: &ParsedCommand,
) -> Result<Arc<TaskDescriptor>, TaskError> {
    let keyword = command.keyword();
    let task = registry
        .resolve(&keyword)
        .await
        .ok_or_else(|| TaskError::NotFound {
            what: format!("task for {keyword:?}"),
        })?;
    if !task.id.is_builtin() || task.id == TaskId::Custom {
        return Err(TaskError::invalid(
            "custom",
            format!("{keyword:?} is not a built-in task; custom tasks can only run built-in ones"),
        ));
    }
    Ok(task)
}

fn descriptor(spec: &CustomTaskSpec) -> TaskDescriptor {
    TaskDescriptor::new(
        TaskId::User(spec.name.clone()),
        spec.name.clone(),
        &spec.triggers,
        spec.description.clone(),
        Arc::new(UserTask {
            command: spec.command.clone(),
        }),
    )
}

/// Register every stored custom task. Returns how many were loaded.
pub async fn load_custom_tasks(
    registry: &TaskRegistry,
    store: &dyn CustomTaskStore,
) -> Result<usize, TaskError> {
    let specs = store.load().await?;
    for spec in &specs {
        registry.register(descriptor(spec)).await;
    }
    tracing::info!(count = specs.len(), "Loaded custom tasks");
    Ok(specs.len())
}

// ── Runner ──────────────────────────────────────────────────────────

/// Replays a stored command, followed by the caller's own arguments.
pub struct UserTask {
    command: String,
}

#[async_trait]
impl TaskHandler for UserTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let body = format!("{} {}", self.command, cmd.body_after_keyword());
        let replay = parse(body.trim())
            .map_err(|e| TaskError::invalid("custom", format!("stored command is invalid: {e}")))?;
        let target = target_of(ctx.registry, &replay).await?;

        tracing::info!(task = %target.name, command = %self.command, "Replaying custom task");
        target.handler.run(ctx, msg, &replay).await
    }
}

// ── Management ──────────────────────────────────────────────────────

/// `custom <action:..>`: add, delete, list and load user tasks.
pub struct CustomTask;

impl CustomTask {
    async fn add(
        &self,
        ctx: &TaskContext<'_>,
        cmd: &ParsedCommand,
    ) -> Result<(String, String), TaskError> {
        let name = cmd
            .setting("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TaskError::invalid("custom", "add needs <name:NAME>"))?;
        let triggers: Vec<String> = cmd
            .setting("trigger")
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .filter(|t: &Vec<String>| !t.is_empty())
            .unwrap_or_else(|| vec![name.to_lowercase()]);

        let command = cmd.without_settings().body_after_keyword();
        if command.is_empty() {
            return Err(TaskError::invalid("custom", "add needs a command to store"));
        }
        let parsed = parse(&command)
            .map_err(|e| TaskError::invalid("custom", format!("command is invalid: {e}")))?;
        let target = target_of(ctx.registry, &parsed).await?;

        if let Some(existing) = ctx.registry.list().await.into_iter().find(|t| t.name == name)
            && existing.id.is_builtin()
        {
            return Err(TaskError::invalid(
                "custom",
                format!("{name:?} is the name of a built-in task"),
            ));
        }

        let spec = CustomTaskSpec {
            name: name.clone(),
            triggers,
            description: cmd.setting("description").unwrap_or_default(),
            command,
        };
        ctx.store.save(&spec).await?;
        ctx.registry.register(descriptor(&spec)).await;

        tracing::info!(task = %name, target = %target.name, "Custom task added");
        Ok((
            "Completed".into(),
            format!(
                "Saved task {name:?}\nTriggers: {}\nRuns: {} ({})",
                spec.triggers.join(", "),
                spec.command,
                target.name
            ),
        ))
    }

    async fn delete(
        &self,
        ctx: &TaskContext<'_>,
        cmd: &ParsedCommand,
    ) -> Result<(String, String), TaskError> {
        let name = cmd
            .setting("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TaskError::invalid("custom", "delete needs <name:NAME>"))?;

        let in_registry = match ctx.registry.get(&TaskId::User(name.clone())).await {
            Some(_) => ctx.registry.unregister(&name).await.is_some(),
            None => false,
        };
        let in_store = ctx.store.delete(&name).await?;
        if !in_registry && !in_store {
            return Err(TaskError::NotFound {
                what: format!("custom task {name:?}"),
            });
        }

        tracing::info!(task = %name, "Custom task deleted");
        Ok(("Completed".into(), format!("Deleted task {name:?}")))
    }

    async fn list(&self, ctx: &TaskContext<'_>) -> (String, String) {
        let lines: Vec<String> = ctx
            .registry
            .list()
            .await
            .into_iter()
            .filter(|t| !t.id.is_builtin())
            .map(|t| format!("[{}] {}: {}", t.triggers.join(", "), t.name, t.description))
            .collect();
        let body = if lines.is_empty() {
            "No custom tasks registered.".to_string()
        } else {
            lines.join("\n")
        };
        ("List".into(), body)
    }
}

#[async_trait]
impl TaskHandler for CustomTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let action = cmd.setting("action").map(|a| a.to_lowercase());
        let (status, body) = match action.as_deref() {
            Some("add") => self.add(ctx, cmd).await?,
            Some("delete") => self.delete(ctx, cmd).await?,
            Some("list") => self.list(ctx).await,
            Some("load") => {
                let count = load_custom_tasks(ctx.registry, ctx.store).await?;
                ("Completed".into(), format!("Loaded {count} custom task(s)"))
            }
            Some(other) => {
                return Err(TaskError::invalid(
                    "custom",
                    format!("unknown action {other:?}\n{USAGE}"),
                ));
            }
            None => ("Main Menu".into(), USAGE.to_string()),
        };
        Ok(OutgoingMessage::reply_to(msg, subject(TAG, &status), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tasks::builtin::testing::{Fixture, message};

    async fn add(fx: &Fixture, body: &str) -> Result<OutgoingMessage, TaskError> {
        fx.run(&CustomTask, &message(body)).await
    }

    #[tokio::test]
    async fn add_registers_and_persists() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let reply = add(
            &fx,
            "custom <action:add> <name:Disk> <trigger:disk,df> <description:free space> shell [df -h]",
        )
        .await
        .unwrap();
        assert_eq!(reply.subject, "TASK: Completed");

        let task = fx.registry.resolve("df").await.unwrap();
        assert_eq!(task.id, TaskId::User("Disk".into()));
        assert_eq!(task.description, "free space");

        let stored = fx.store.specs.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].command, "shell [df -h]");
        assert_eq!(stored[0].triggers, vec!["disk", "df"]);
    }

    #[tokio::test]
    async fn trigger_defaults_to_name() {
        let fx = Fixture::new(EngineConfig::default()).await;
        add(&fx, "custom <action:add> <name:Menu> help").await.unwrap();
        assert!(fx.registry.resolve("menu").await.is_some());
    }

    #[tokio::test]
    async fn cannot_target_custom_tasks() {
        let fx = Fixture::new(EngineConfig::default()).await;
        add(&fx, "custom <action:add> <name:first> help").await.unwrap();

        let err = add(&fx, "custom <action:add> <name:second> first").await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidArguments { .. }));

        let err = add(&fx, "custom <action:add> <name:third> custom").await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn cannot_shadow_builtin_name() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let err = add(&fx, "custom <action:add> <name:Help> <trigger:h> help")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn replay_runs_builtin() {
        let fx = Fixture::new(EngineConfig::default()).await;
        add(&fx, "custom <action:add> <name:status> <trigger:st> manage [status]")
            .await
            .unwrap();

        let task = fx.registry.resolve("st").await.unwrap();
        let reply = fx.run(task.handler.as_ref(), &message("st")).await.unwrap();
        assert_eq!(reply.subject, "MANAGE: Status");
    }

    #[tokio::test]
    async fn replay_appends_caller_args() {
        let fx = Fixture::new(EngineConfig::default()).await;
        add(&fx, "custom <action:add> <name:ctl> manage").await.unwrap();

        let task = fx.registry.resolve("ctl").await.unwrap();
        fx.run(task.handler.as_ref(), &message("ctl [freeze]"))
            .await
            .unwrap();
        assert!(fx.state.is_frozen());
    }

    #[tokio::test]
    async fn delete_and_list() {
        let fx = Fixture::new(EngineConfig::default()).await;
        add(&fx, "custom <action:add> <name:a> help").await.unwrap();

        let listed = add(&fx, "custom <action:list>").await.unwrap();
        assert!(listed.body.contains("[a] a"));

        add(&fx, "custom <action:delete> <name:a>").await.unwrap();
        assert!(fx.registry.resolve("a").await.is_none());
        assert!(fx.store.specs.lock().unwrap().is_empty());

        let err = add(&fx, "custom <action:delete> <name:a>").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }

    #[tokio::test]
    async fn load_restores_from_store() {
        let fx = Fixture::new(EngineConfig::default()).await;
        fx.store.specs.lock().unwrap().push(CustomTaskSpec {
            name: "up".into(),
            triggers: vec!["up".into()],
            description: String::new(),
            command: "shell [uptime]".into(),
        });

        let reply = add(&fx, "custom <action:load>").await.unwrap();
        assert!(reply.body.contains("Loaded 1"));
        assert!(fx.registry.resolve("up").await.is_some());
    }

    #[tokio::test]
    async fn no_action_is_usage() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let reply = add(&fx, "custom").await.unwrap();
        assert_eq!(reply.subject, "TASK: Main Menu");
    }
}
