//! Command invocation configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single invocation of an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArgs {
    /// Program to run (looked up on PATH)
    pub cmd: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
}

impl RunArgs {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout_seconds: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Whether `expected` appears as a contiguous run of arguments.
    pub fn has_args(&self, expected: &[&str]) -> bool {
        if expected.is_empty() {
            return true;
        }
        self.args
            .windows(expected.len())
            .any(|w| w.iter().map(String::as_str).eq(expected.iter().copied()))
    }

    /// Render the command line for logging. Values are never masked, so do
    /// not log invocations that carry secrets in arguments.
    pub fn display(&self) -> String {
        let mut line = self.cmd.clone();
        for arg in &self.args {
            if arg.contains(' ') {
                line.push_str(&format!(" '{}'", arg));
            } else {
                line.push(' ');
                line.push_str(arg);
            }
        }
        line
    }
}
