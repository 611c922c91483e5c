//! Command runner trait and types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RunArgs;
use crate::error::RunnerResult;

/// Result of running an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Exit code of the process
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl RunResult {
    /// Check if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs external tools.
///
/// A non-zero exit code is not an error at this layer; callers inspect
/// [`RunResult::success`] and decide.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &RunArgs, cancel: &CancellationToken) -> RunnerResult<RunResult>;
}
