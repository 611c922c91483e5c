//! Console trait and prompt options.

use async_trait::async_trait;

use crate::error::ConsoleResult;

/// Options for a confirmation or text prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOptions {
    pub message: String,
    /// Default answer for confirmations.
    pub default_value: bool,
    /// Default text for prompts.
    pub default_text: Option<String>,
    pub help: Option<String>,
    /// Hide the typed answer.
    pub secret: bool,
}

impl ConsoleOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn default_value(mut self, value: bool) -> Self {
        self.default_value = value;
        self
    }

    pub fn default_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = Some(text.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn secret(mut self, secret: bool) -> Self {
        self.secret = secret;
        self
    }
}

/// User-facing console.
///
/// Calls suspend the caller until the user answers.
#[async_trait]
pub trait Console: Send + Sync {
    /// Show an informational message.
    fn message(&self, message: &str);

    /// Ask a yes/no question.
    async fn confirm(&self, options: ConsoleOptions) -> ConsoleResult<bool>;

    /// Ask for a line of text.
    async fn prompt(&self, options: ConsoleOptions) -> ConsoleResult<String>;

    /// Whether the console may ask questions at all.
    fn is_interactive(&self) -> bool;
}
