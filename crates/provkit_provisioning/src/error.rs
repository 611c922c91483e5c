//! Error types for provisioning.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::deployment::{DestroyResult, OutputParameter};

/// Result type alias for provisioning operations.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Errors that can occur while planning, deploying or destroying.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// Invalid or missing settings, detected before any remote call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No deployment found at {scope}")]
    NotFound { scope: String },

    /// The backend attempted the deploy and failed. Outputs observed
    /// before the failure are kept.
    #[error("Deployment failed: {message}")]
    DeploymentFailed {
        message: String,
        outputs: BTreeMap<String, OutputParameter>,
    },

    #[error("Destroy aborted: confirmation was declined")]
    DestroyAborted,

    /// Purge failed after a completed teardown; `result` is still valid.
    #[error("Purge failed after destroy: {message}")]
    PurgeFailed {
        result: Box<DestroyResult>,
        message: String,
    },

    #[error("Deleting resource group '{group}' failed (already deleted: [{}]): {source}", .deleted.join(", "))]
    ResourceGroupDelete {
        group: String,
        deleted: Vec<String>,
        source: provkit_infra::InfraError,
    },

    #[error("{command} failed: {message}")]
    ToolFailed { command: String, message: String },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("{operation} failed for {scope}: {source}")]
    Context {
        operation: String,
        scope: String,
        source: Box<ProvisioningError>,
    },

    #[error("Infra error: {0}")]
    Infra(#[from] provkit_infra::InfraError),

    #[error("Runner error: {0}")]
    Runner(#[from] provkit_runner::RunnerError),

    #[error("Console error: {0}")]
    Console(#[from] provkit_console::ConsoleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisioningError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// The innermost error, looking through [`ProvisioningError::Context`].
    pub fn root(&self) -> &ProvisioningError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Self::NotFound { .. } => true,
            Self::Infra(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), Self::Configuration(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.root(), Self::DestroyAborted)
    }

    /// The completed destroy result carried by a purge failure.
    pub fn destroy_result(&self) -> Option<&DestroyResult> {
        match self.root() {
            Self::PurgeFailed { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Partial outputs carried by a failed deployment.
    pub fn partial_outputs(&self) -> Option<&BTreeMap<String, OutputParameter>> {
        match self.root() {
            Self::DeploymentFailed { outputs, .. } => Some(outputs),
            _ => None,
        }
    }

    /// Attach the operation and scope. Taxonomy errors are returned as-is
    /// so callers can match on them directly.
    pub fn with_context(self, operation: &str, scope: &str) -> Self {
        match self {
            Self::Configuration(_)
            | Self::NotFound { .. }
            | Self::DeploymentFailed { .. }
            | Self::DestroyAborted
            | Self::PurgeFailed { .. }
            | Self::ResourceGroupDelete { .. }
            | Self::Cancelled { .. }
            | Self::Context { .. } => self,
            other => Self::Context {
                operation: operation.to_string(),
                scope: scope.to_string(),
                source: Box::new(other),
            },
        }
    }
}
