//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while running external tools.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Command cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
