//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Engine configuration.
///
/// Loaded from an optional JSON settings file, then overridden by `EMALIA_*`
/// environment variables. Every field has a default so a partial settings
/// file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the instance; also a trigger for the management task.
    pub instance_name: String,
    /// Maximum replies per run before the engine freezes (<0 for unbounded).
    pub max_send_count: i64,
    /// Target cadence of the poll loop, in seconds.
    pub scan_interval_secs: f64,
    /// Directories the file tasks are allowed to touch.
    pub file_roots: Vec<PathBuf>,
    /// Default target directory for the write task.
    pub inbox_dir: PathBuf,
    /// Directory holding `custom_tasks.json`.
    pub save_path: PathBuf,
    /// Program used by the shell task (`sh`, `cmd`, `powershell`, ...).
    pub shell_program: String,
    /// Interpreter used by the code task.
    pub code_interpreter: String,
    /// Timeout for shell, code and HTTP tasks, in seconds.
    pub handler_timeout_secs: u64,
    /// Strip quoted reply text from the body before parsing.
    pub strip_quoted_replies: bool,
    /// Maximum directory depth searched when a path does not exist as given.
    pub search_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: "Emalia".to_string(),
            max_send_count: -1,
            scan_interval_secs: 5.0,
            file_roots: vec![PathBuf::from(".")],
            inbox_dir: PathBuf::from("./inbox"),
            save_path: PathBuf::from("."),
            shell_program: default_shell().to_string(),
            code_interpreter: "python3".to_string(),
            handler_timeout_secs: 120,
            strip_quoted_replies: true,
            search_depth: 6,
        }
    }
}

fn default_shell() -> &'static str {
    if cfg!(target_os = "windows") { "cmd" } else { "sh" }
}

impl EngineConfig {
    /// Load configuration from a settings file (if given) and the environment.
    pub fn load(settings_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match settings_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON settings file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }

    /// Apply `EMALIA_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = var("EMALIA_NAME") {
            self.instance_name = name;
        }
        if let Some(raw) = var("EMALIA_MAX_SEND_COUNT") {
            self.max_send_count = parse_value("EMALIA_MAX_SEND_COUNT", &raw)?;
        }
        if let Some(raw) = var("EMALIA_SCAN_INTERVAL_SECS") {
            self.scan_interval_secs = parse_value("EMALIA_SCAN_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = var("EMALIA_FILE_ROOTS") {
            self.file_roots = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(dir) = var("EMALIA_INBOX_DIR") {
            self.inbox_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("EMALIA_SAVE_PATH") {
            self.save_path = PathBuf::from(dir);
        }
        if let Some(shell) = var("EMALIA_SHELL") {
            self.shell_program = shell;
        }
        if let Some(interp) = var("EMALIA_CODE_INTERPRETER") {
            self.code_interpreter = interp;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scan_interval_secs.is_finite() || self.scan_interval_secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "scan_interval_secs".into(),
                message: format!("must be a non-negative number, got {}", self.scan_interval_secs),
            });
        }
        if self.instance_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "instance_name".into(),
                message: "must not be empty".into(),
            });
        }
        if self.file_roots.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "file_roots".into(),
                message: "at least one root is required".into(),
            });
        }
        Ok(())
    }

    /// Scan interval as a `Duration`.
    pub fn scan_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.scan_interval_secs).unwrap_or(Duration::ZERO)
    }

    /// Handler timeout as a `Duration`.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    /// Location of the persisted custom task list.
    pub fn custom_tasks_path(&self) -> PathBuf {
        self.save_path.join("custom_tasks.json")
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
