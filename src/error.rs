//! Error types for Emalia.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl Error {
    /// Classify this error into one of the reporting categories.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Command(CommandError::Malformed { .. }) => ErrorKind::Malformed,
            Self::Command(CommandError::Unknown { .. }) => ErrorKind::Unknown,
            Self::Mailbox(_) => ErrorKind::Transport,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Task(_) | Self::Llm(_) | Self::Config(_) | Self::Engine(_) => ErrorKind::Handler,
        }
    }
}

/// Reporting category of an error.
///
/// Only `Transport` (during fetch) and `Validation` are swallowed without a
/// reply; every other kind is reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    Unknown,
    Handler,
    Transport,
    Validation,
}

impl ErrorKind {
    /// Whether the sender gets an error reply for this kind.
    pub fn is_reported(&self) -> bool {
        !matches!(self, Self::Transport | Self::Validation)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Malformed => "malformed_command",
            Self::Unknown => "unknown_command",
            Self::Handler => "handler_failure",
            Self::Transport => "transport_failure",
            Self::Validation => "validation_failure",
        };
        write!(f, "{s}")
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command body parse and resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Malformed command: unmatched '{delimiter}' at position {position}")]
    Malformed { delimiter: char, position: usize },

    #[error("Unknown command {keyword:?}")]
    Unknown { keyword: String },
}

/// Failures raised by task handlers.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid arguments for {task}: {reason}")]
    InvalidArguments { task: String, reason: String },

    #[error("Access to {path} is not permitted")]
    NotPermitted { path: String },

    #[error("{what} does not exist")]
    NotFound { what: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Custom task store error: {0}")]
    Store(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Shorthand for an `InvalidArguments` error.
    pub fn invalid(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            task: task.into(),
            reason: reason.into(),
        }
    }
}

/// Mailbox transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed for {user}")]
    Auth { user: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to send message to {to}: {reason}")]
    Send { to: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetched messages that cannot be processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Message {id} could not be parsed")]
    Unparseable { id: String },

    #[error("Message {id} has no resolvable sender")]
    MissingSender { id: String },

    #[error("Message {id} has no subject")]
    MissingSubject { id: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("No API key configured for {provider}")]
    MissingApiKey { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine control errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine {name} is already running")]
    AlreadyRunning { name: String },
}

/// Result type alias for Emalia.
pub type Result<T> = std::result::Result<T, Error>;
