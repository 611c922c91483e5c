//! Error types for the console module.

use thiserror::Error;

/// Result type alias for console operations.
pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Errors that can occur while interacting with the user.
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Prompting is disabled in non-interactive mode: {0}")]
    NonInteractive(String),

    #[error("No scripted response for: {0}")]
    NoResponse(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),
}
