//! Process-based command runner.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RunArgs;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, RunResult};

/// Runs tools as child processes of the current process.
///
/// Output is captured, not streamed. Cancelling the token kills the child.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    default_timeout_seconds: u64,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied when a [`RunArgs`] does not set its own.
    pub fn with_default_timeout(mut self, seconds: u64) -> Self {
        self.default_timeout_seconds = seconds;
        self
    }

    fn build_command(args: &RunArgs) -> Command {
        let mut cmd = Command::new(&args.cmd);
        cmd.args(&args.args)
            .envs(&args.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &args.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &RunArgs, cancel: &CancellationToken) -> RunnerResult<RunResult> {
        debug!("Executing: {}", args.display());

        let child = Self::build_command(args).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::ToolNotFound(args.cmd.clone())
            } else {
                RunnerError::ExecutionFailed(format!("Failed to spawn {}: {}", args.cmd, e))
            }
        })?;

        let timeout = if args.timeout_seconds > 0 {
            args.timeout_seconds
        } else {
            self.default_timeout_seconds
        };

        let started = Instant::now();
        let wait = async move {
            if timeout > 0 {
                match tokio::time::timeout(Duration::from_secs(timeout), child.wait_with_output())
                    .await
                {
                    Ok(output) => output.map_err(RunnerError::from),
                    Err(_) => Err(RunnerError::Timeout(timeout)),
                }
            } else {
                child.wait_with_output().await.map_err(RunnerError::from)
            }
        };

        // Dropping `wait` drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Cancelled: {}", args.display());
                return Err(RunnerError::Cancelled(args.display()));
            }
            output = wait => output?,
        };

        let result = RunResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            "{} exited with {} after {}ms",
            args.cmd, result.exit_code, result.duration_ms
        );

        Ok(result)
    }
}

/// Locate `name` on PATH.
pub fn tool_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", name));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
