//! Scripted console for testing.
//!
//! Responses are registered against predicates on the prompt options and
//! every message, confirmation and prompt is appended to a transcript so
//! tests can assert on what the user would have seen, and in which order.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::console::{Console, ConsoleOptions};
use crate::error::{ConsoleError, ConsoleResult};

type Predicate = Arc<dyn Fn(&ConsoleOptions) -> bool + Send + Sync>;

struct Expectation<T> {
    predicate: Predicate,
    response: T,
}

/// Console double with a recorded transcript.
#[derive(Clone)]
pub struct MockConsole {
    transcript: Arc<RwLock<Vec<String>>>,
    confirms: Arc<RwLock<Vec<Expectation<bool>>>>,
    prompts: Arc<RwLock<Vec<Expectation<String>>>>,
    interactive: bool,
}

impl Default for MockConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConsole {
    pub fn new() -> Self {
        Self {
            transcript: Arc::new(RwLock::new(Vec::new())),
            confirms: Arc::new(RwLock::new(Vec::new())),
            prompts: Arc::new(RwLock::new(Vec::new())),
            interactive: true,
        }
    }

    /// Set whether the console reports itself as interactive.
    pub fn set_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Script the answer to confirmations matching `predicate`.
    pub fn when_confirm<F>(&self, predicate: F) -> WhenConfirm<'_>
    where
        F: Fn(&ConsoleOptions) -> bool + Send + Sync + 'static,
    {
        WhenConfirm {
            console: self,
            predicate: Arc::new(predicate),
        }
    }

    /// Script the answer to text prompts matching `predicate`.
    pub fn when_prompt<F>(&self, predicate: F) -> WhenPrompt<'_>
    where
        F: Fn(&ConsoleOptions) -> bool + Send + Sync + 'static,
    {
        WhenPrompt {
            console: self,
            predicate: Arc::new(predicate),
        }
    }

    /// Everything shown so far, in order.
    pub fn output(&self) -> Vec<String> {
        self.transcript.read().clone()
    }

    /// Whether any transcript line contains `text`.
    pub fn output_contains(&self, text: &str) -> bool {
        self.transcript.read().iter().any(|line| line.contains(text))
    }

    pub fn clear_output(&self) {
        self.transcript.write().clear();
    }

    fn record(&self, line: &str) {
        self.transcript.write().push(line.to_string());
    }
}

/// Pending confirmation expectation; finish it with [`WhenConfirm::respond`].
pub struct WhenConfirm<'a> {
    console: &'a MockConsole,
    predicate: Predicate,
}

impl WhenConfirm<'_> {
    pub fn respond(self, value: bool) {
        self.console.confirms.write().push(Expectation {
            predicate: self.predicate,
            response: value,
        });
    }
}

/// Pending prompt expectation; finish it with [`WhenPrompt::respond`].
pub struct WhenPrompt<'a> {
    console: &'a MockConsole,
    predicate: Predicate,
}

impl WhenPrompt<'_> {
    pub fn respond(self, value: impl Into<String>) {
        self.console.prompts.write().push(Expectation {
            predicate: self.predicate,
            response: value.into(),
        });
    }
}

#[async_trait]
impl Console for MockConsole {
    fn message(&self, message: &str) {
        self.record(message);
    }

    async fn confirm(&self, options: ConsoleOptions) -> ConsoleResult<bool> {
        self.record(&options.message);

        // Most recently registered expectation wins.
        self.confirms
            .read()
            .iter()
            .rev()
            .find(|e| (e.predicate)(&options))
            .map(|e| e.response)
            .ok_or(ConsoleError::NoResponse(options.message))
    }

    async fn prompt(&self, options: ConsoleOptions) -> ConsoleResult<String> {
        self.record(&options.message);

        self.prompts
            .read()
            .iter()
            .rev()
            .find(|e| (e.predicate)(&options))
            .map(|e| e.response.clone())
            .ok_or(ConsoleError::NoResponse(options.message))
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_confirm_scripted_response() {
        let console = MockConsole::new();
        console
            .when_confirm(|o| o.message.contains("destroy"))
            .respond(true);

        let answer = console
            .confirm(ConsoleOptions::new("Are you sure you want to destroy?"))
            .await
            .unwrap();

        assert!(answer);
        assert_eq!(console.output(), vec!["Are you sure you want to destroy?"]);
    }

    #[tokio::test]
    async fn test_unmatched_confirm_is_an_error() {
        let console = MockConsole::new();
        console.when_confirm(|o| o.message == "other").respond(true);

        let result = console.confirm(ConsoleOptions::new("Proceed?")).await;

        assert!(matches!(result, Err(ConsoleError::NoResponse(_))));
        assert!(console.output_contains("Proceed?"));
    }

    #[tokio::test]
    async fn test_latest_expectation_wins() {
        let console = MockConsole::new();
        console.when_confirm(|_| true).respond(true);
        console.when_confirm(|_| true).respond(false);

        assert!(!console.confirm(ConsoleOptions::new("x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_prompt_and_messages_are_recorded_in_order() {
        let console = MockConsole::new();
        console
            .when_prompt(|o| o.message.contains("sku"))
            .respond("Standard");

        console.message("Provisioning");
        let value = console.prompt(ConsoleOptions::new("Value for 'sku'")).await.unwrap();

        assert_eq!(value, "Standard");
        assert_eq!(console.output(), vec!["Provisioning", "Value for 'sku'"]);
    }
}
