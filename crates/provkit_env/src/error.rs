//! Error types for the environment module.

use thiserror::Error;

/// Result type alias for environment operations.
pub type EnvResult<T> = Result<T, EnvError>;

/// Errors that can occur while loading or saving environments.
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Environment not found: {0}")]
    NotFound(String),

    #[error("Invalid environment name: {0}")]
    InvalidName(String),

    #[error("Malformed {file}: {message}")]
    Parse { file: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
