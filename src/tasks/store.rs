//! Persistence for user-defined tasks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// A user-defined task as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTaskSpec {
    pub name: String,
    pub triggers: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Command body replayed against a built-in task.
    pub command: String,
}

/// Storage for custom task definitions.
#[async_trait]
pub trait CustomTaskStore: Send + Sync {
    /// Every stored task, in insertion order.
    async fn load(&self) -> Result<Vec<CustomTaskSpec>, TaskError>;

    /// Insert or replace a task by name.
    async fn save(&self, spec: &CustomTaskSpec) -> Result<(), TaskError>;

    /// Delete a task by name. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, TaskError>;
}

/// JSON array on disk.
pub struct JsonTaskStore {
    path: PathBuf,
}

impl JsonTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<CustomTaskSpec>, TaskError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| TaskError::Store(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TaskError::Io(e)),
        }
    }

    async fn write_all(&self, specs: &[CustomTaskSpec]) -> Result<(), TaskError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(specs)
            .map_err(|e| TaskError::Store(e.to_string()))?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl CustomTaskStore for JsonTaskStore {
    async fn load(&self) -> Result<Vec<CustomTaskSpec>, TaskError> {
        self.read_all().await
    }

    async fn save(&self, spec: &CustomTaskSpec) -> Result<(), TaskError> {
        let mut specs = self.read_all().await?;
        match specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => *existing = spec.clone(),
            None => specs.push(spec.clone()),
        }
        self.write_all(&specs).await
    }

    async fn delete(&self, name: &str) -> Result<bool, TaskError> {
        let mut specs = self.read_all().await?;
        let before = specs.len();
        specs.retain(|s| s.name != name);
        if specs.len() == before {
            return Ok(false);
        }
        self.write_all(&specs).await?;
        Ok(true)
    }
}
