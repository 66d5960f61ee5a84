//! Tasks: the units of work a command keyword selects.

pub mod builtin;
pub mod registry;
pub mod store;
pub mod task;

pub use builtin::{default_registry, default_tasks, load_custom_tasks};
pub use registry::TaskRegistry;
pub use store::{CustomTaskSpec, CustomTaskStore, JsonTaskStore};
pub use task::{TaskContext, TaskDescriptor, TaskHandler, TaskId};
