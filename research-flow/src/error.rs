use thiserror::Error;

/// Errors raised by the stage engine.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;
