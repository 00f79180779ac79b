//! Error taxonomy shared by every TaskRelay crate.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, TaskRelayError>;

#[derive(Debug, Error)]
pub enum TaskRelayError {
    /// Connection refused, DNS failure, request timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Empty or non-JSON body. Retried while polling.
    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    #[error("Task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error(
        "Task {task_id} still running after {attempts} status checks; follow up manually with this task id"
    )]
    Timeout { task_id: String, attempts: u32 },

    /// Neither an async acknowledgement nor an inline result.
    #[error("Invalid workflow response: {0}")]
    InvalidResponse(String),

    #[error("A task is already in flight for flow '{0}'")]
    Busy(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TaskRelayError {
    /// Whether a poll loop should retry after this error instead of stopping.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskRelayError::MalformedBody(_))
    }

    /// Task id carried by the error, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskRelayError::TaskFailed { task_id, .. } | TaskRelayError::Timeout { task_id, .. } => {
                Some(task_id)
            }
            _ => None,
        }
    }
}
