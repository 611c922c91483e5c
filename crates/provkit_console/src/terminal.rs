//! Terminal console backed by `dialoguer`.

use async_trait::async_trait;
use dialoguer::{Confirm, Input, Password};
use tracing::debug;

use crate::console::{Console, ConsoleOptions};
use crate::error::{ConsoleError, ConsoleResult};

/// Console that renders prompts on the controlling terminal.
///
/// In non-interactive mode confirmations resolve to their default value and
/// text prompts fail, so unattended runs never block on input.
#[derive(Debug, Clone)]
pub struct TerminalConsole {
    interactive: bool,
}

impl TerminalConsole {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }
}

#[async_trait]
impl Console for TerminalConsole {
    fn message(&self, message: &str) {
        println!("{}", message);
    }

    async fn confirm(&self, options: ConsoleOptions) -> ConsoleResult<bool> {
        if !self.interactive {
            debug!(
                "Non-interactive confirm '{}', using default {}",
                options.message, options.default_value
            );
            return Ok(options.default_value);
        }

        tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(options.message)
                .default(options.default_value)
                .interact()
                .map_err(|e| ConsoleError::Prompt(e.to_string()))
        })
        .await
        .map_err(|e| ConsoleError::Prompt(e.to_string()))?
    }

    async fn prompt(&self, options: ConsoleOptions) -> ConsoleResult<String> {
        if !self.interactive {
            return Err(ConsoleError::NonInteractive(options.message));
        }

        tokio::task::spawn_blocking(move || {
            if options.secret {
                return Password::new()
                    .with_prompt(options.message)
                    .interact()
                    .map_err(|e| ConsoleError::Prompt(e.to_string()));
            }

            let mut input = Input::<String>::new().with_prompt(options.message);
            if let Some(default) = options.default_text {
                input = input.default(default);
            }
            input
                .interact_text()
                .map_err(|e| ConsoleError::Prompt(e.to_string()))
        })
        .await
        .map_err(|e| ConsoleError::Prompt(e.to_string()))?
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_interactive_confirm_uses_default() {
        let console = TerminalConsole::new(false);

        let yes = console
            .confirm(ConsoleOptions::new("Continue?").default_value(true))
            .await
            .unwrap();
        let no = console.confirm(ConsoleOptions::new("Continue?")).await.unwrap();

        assert!(yes);
        assert!(!no);
    }

    #[tokio::test]
    async fn test_non_interactive_prompt_fails() {
        let console = TerminalConsole::new(false);

        let result = console.prompt(ConsoleOptions::new("Value for 'sku'")).await;
        assert!(matches!(result, Err(ConsoleError::NonInteractive(_))));

        let secret = console
            .prompt(ConsoleOptions::new("Value for 'adminPassword'").secret(true))
            .await;
        assert!(matches!(secret, Err(ConsoleError::NonInteractive(_))));
    }
}
