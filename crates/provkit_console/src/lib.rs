//! # provkit_console
//!
//! The console collaborator used by provisioning to talk to the user.
//!
//! - [`TerminalConsole`] renders prompts with `dialoguer`
//! - [`MockConsole`] answers from scripted expectations and keeps a
//!   transcript of everything that was shown, for tests

pub mod console;
pub mod error;
pub mod mock;
pub mod terminal;

pub use console::{Console, ConsoleOptions};
pub use error::{ConsoleError, ConsoleResult};
pub use mock::MockConsole;
pub use terminal::TerminalConsole;
