//! Error types for the tenant runtime.

use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use trellis_commons::ValidationErrors;

/// Errors raised by the runtime itself (host-facing).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Task function {0:?} is already registered")]
    DuplicateTask(String),

    #[error("runTasks re-entered while a tick is in progress")]
    Reentrant,

    #[error("Timer ceiling reached ({0} active)")]
    TimerCeiling(usize),

    #[error("Runtime has been torn down")]
    Gone,
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failure of a single task or subtask; becomes the payload of a `CallError`
/// message or the rejection of a pending subtask future.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Task function {0:?} not found")]
    NotFound(String),

    #[error("Query was not compiled; refusing to execute")]
    UncompiledQuery,

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Request {0} was cancelled")]
    Cancelled(u32),

    #[error("Subtask {subtask} rejected")]
    Subtask { subtask: u32, data: JsonValue },

    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Wire rendering carried in the `CallError` outbox slot.
    pub fn to_wire(&self) -> JsonValue {
        match self {
            TaskError::NotFound(name) => json!({
                "errorType": "ServerError",
                "message": format!("Task function {:?} not found", name),
            }),
            TaskError::UncompiledQuery => json!({
                "errorType": "ServerError",
                "message": "Query was not compiled; refusing to execute",
            }),
            TaskError::Validation(errors) => json!({
                "errorType": "ValidationError",
                "error": errors,
            }),
            TaskError::Cancelled(id) => json!({
                "errorType": "ServerError",
                "message": format!("Request {} was cancelled", id),
            }),
            TaskError::Subtask { data, .. } => data.clone(),
            TaskError::Other(msg) => json!({
                "errorType": "ServerError",
                "message": msg,
            }),
        }
    }
}
