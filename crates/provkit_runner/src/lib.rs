//! # provkit_runner
//!
//! Execution of the external tools provisioning backends drive
//! (`az`, `bicep`, `terraform`).
//!
//! - [`ProcessRunner`] spawns real processes with timeout and cancellation
//! - [`MockRunner`] captures calls and replays scripted responses
//!
//! # Example
//!
//! ```rust,no_run
//! use provkit_runner::{CommandRunner, ProcessRunner, RunArgs};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::new();
//!     let args = RunArgs::new("terraform").arg("version");
//!     let result = runner.run(&args, &CancellationToken::new()).await?;
//!     println!("{}", result.stdout);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod mock;
pub mod process;
pub mod runner;

pub use config::RunArgs;
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use process::{tool_in_path, ProcessRunner};
pub use runner::{CommandRunner, RunResult};
