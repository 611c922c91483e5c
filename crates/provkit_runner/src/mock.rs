//! Mock command runner for testing.
//!
//! Provides a configurable mock implementation of the CommandRunner trait
//! so provider tests can script `az` / `terraform` output without the
//! tools being installed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::RunArgs;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, RunResult};

/// Predefined mock response for a command.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CapturedCall {
    pub fn has_args(&self, expected: &[&str]) -> bool {
        self.as_run_args().has_args(expected)
    }

    fn as_run_args(&self) -> RunArgs {
        RunArgs {
            cmd: self.cmd.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            timeout_seconds: 0,
        }
    }
}

type Matcher = Arc<dyn Fn(&RunArgs) -> bool + Send + Sync>;

/// Mock command runner.
///
/// Responses are chosen in this order: the most recently registered
/// matcher that accepts the call, then the queued responses in rotation,
/// then an empty success.
#[derive(Clone)]
pub struct MockRunner {
    matched: Arc<RwLock<Vec<(Matcher, MockResponse)>>>,
    responses: Arc<RwLock<Vec<MockResponse>>>,
    response_index: Arc<AtomicUsize>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            matched: Arc::new(RwLock::new(Vec::new())),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            simulate_failure: Arc::new(RwLock::new(None)),
        }
    }

    /// Respond to calls accepted by `matcher`.
    pub fn when<F>(self, matcher: F, response: MockResponse) -> Self
    where
        F: Fn(&RunArgs) -> bool + Send + Sync + 'static,
    {
        self.matched.write().push((Arc::new(matcher), response));
        self
    }

    /// Respond to calls of `cmd` whose arguments contain `args` contiguously.
    pub fn when_args(self, cmd: &str, args: &[&str], response: MockResponse) -> Self {
        let cmd = cmd.to_string();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.when(
            move |call| {
                let expected: Vec<&str> = args.iter().map(String::as_str).collect();
                call.cmd == cmd && call.has_args(&expected)
            },
            response,
        )
    }

    /// Add a response to the unmatched rotation.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Fail every call with an execution error.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Calls of `cmd` containing `args` contiguously.
    pub fn calls_with(&self, cmd: &str, args: &[&str]) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.cmd == cmd && c.has_args(args))
            .cloned()
            .collect()
    }

    pub fn was_called_with(&self, cmd: &str, args: &[&str]) -> bool {
        !self.calls_with(cmd, args).is_empty()
    }

    fn record_call(&self, args: &RunArgs) {
        self.captured_calls.write().push(CapturedCall {
            cmd: args.cmd.clone(),
            args: args.args.clone(),
            cwd: args.cwd.clone(),
            env: args.env.clone(),
        });
    }

    fn next_response(&self, args: &RunArgs) -> MockResponse {
        if let Some((_, response)) = self.matched.read().iter().rev().find(|(m, _)| m(args)) {
            return response.clone();
        }

        let responses = self.responses.read();
        if responses.is_empty() {
            return MockResponse::success("");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index % responses.len())
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, args: &RunArgs, cancel: &CancellationToken) -> RunnerResult<RunResult> {
        self.record_call(args);

        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled(args.display()));
        }
        if let Some(msg) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(msg));
        }

        let response = self.next_response(args);
        Ok(RunResult {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            duration_ms: 0,
        })
    }
}
