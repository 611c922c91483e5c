//! Error types for the infra module.

use thiserror::Error;

/// Result type alias for infra operations.
pub type InfraResult<T> = Result<T, InfraError>;

/// Errors that can occur while talking to the control plane.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("0 resource groups with tag '{tag}' with value: '{value}'")]
    ResourceGroupsNotFound { tag: String, value: String },

    #[error("az {command} failed: {message}")]
    AzCli { command: String, message: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid resource id '{id}': {message}")]
    InvalidResourceId { id: String, message: String },

    #[error("{0} is not set as an output variable")]
    EnvValueMissing(String),

    #[error("{0} is empty")]
    EnvValueEmpty(String),

    #[error("Runner error: {0}")]
    Runner(#[from] provkit_runner::RunnerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InfraError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ResourceGroupsNotFound { .. })
    }
}
