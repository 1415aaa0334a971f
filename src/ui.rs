//! Operator interaction.
//!
//! Provisioners and the orchestrator talk to the operator only through the
//! [`Ui`] trait: confirmation prompts, leveled messages and terminal
//! capabilities. The terminal implementation writes to stderr only, like the
//! formatted command output.

use colored::Colorize;
use std::io::{BufRead, IsTerminal, Write};

use crate::error::{PipelineError, Result};

/// Severity of a message shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Detail shown in debug mode only.
    Debug,
    /// Regular progress.
    Info,
    /// A completed step.
    Success,
    /// Something the operator should notice.
    Warn,
    /// A failure.
    Error,
}

/// Operator interface.
#[cfg_attr(test, mockall::automock)]
pub trait Ui: Send + Sync {
    /// Asks a yes/no question. Blocks until answered.
    ///
    /// # Errors
    ///
    /// Returns an error if nobody can answer.
    fn ask(&self, prompt: &str) -> Result<bool>;

    /// Shows a message.
    fn print(&self, level: Level, message: &str);

    /// Returns true if the output supports color.
    fn has_color(&self) -> bool;

    /// Returns true in debug mode.
    fn debug(&self) -> bool;

    /// Returns true if an operator is attached to answer questions.
    fn is_interactive(&self) -> bool;
}

/// Terminal implementation of [`Ui`].
#[derive(Debug, Clone, Default)]
pub struct TerminalUi {
    answer: Option<bool>,
    debug: bool,
    color: bool,
}

impl TerminalUi {
    /// Creates a terminal UI, detecting color support.
    #[must_use]
    pub fn new() -> Self {
        Self {
            answer: None,
            debug: false,
            color: colored::control::SHOULD_COLORIZE.should_colorize(),
        }
    }

    /// Answers every question with `answer` instead of prompting.
    #[must_use]
    pub const fn with_answer(mut self, answer: bool) -> Self {
        self.answer = Some(answer);
        self
    }

    /// Enables debug mode.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Overrides color support.
    #[must_use]
    pub const fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }
}

/// Interprets a prompt reply. Anything but yes is no.
#[must_use]
pub fn parse_answer(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "y" | "yes")
}

impl Ui for TerminalUi {
    fn ask(&self, prompt: &str) -> Result<bool> {
        if let Some(answer) = self.answer {
            let shown = if answer { "yes" } else { "no" };
            eprintln!("{prompt} [y/N] {shown}");
            return Ok(answer);
        }

        if !std::io::stdin().is_terminal() {
            return Err(PipelineError::PromptUnavailable {
                message: String::from("stdin is not a terminal; pass --yes to confirm"),
            }
            .into());
        }

        eprint!("{prompt} [y/N] ");
        std::io::stderr().flush()?;

        let mut reply = String::new();
        std::io::stdin().lock().read_line(&mut reply)?;
        Ok(parse_answer(&reply))
    }

    fn print(&self, level: Level, message: &str) {
        match level {
            Level::Debug if self.debug => eprintln!("{}", message.dimmed()),
            Level::Debug => {}
            Level::Info => eprintln!("{message}"),
            Level::Success => eprintln!("{} {message}", "✓".green()),
            Level::Warn => eprintln!("{} {message}", "⚠".yellow()),
            Level::Error => eprintln!("{} {message}", "✗".red()),
        }
    }

    fn has_color(&self) -> bool {
        self.color
    }

    fn debug(&self) -> bool {
        self.debug
    }

    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert!(parse_answer("y\n"));
        assert!(parse_answer(" YES "));
        assert!(!parse_answer("\n"));
        assert!(!parse_answer("nope"));
    }

    #[test]
    fn test_preset_answer_skips_prompt() {
        let ui = TerminalUi::new().with_answer(true);
        assert!(ui.ask("Proceed?").expect("ask"));

        let ui = TerminalUi::new().with_answer(false);
        assert!(!ui.ask("Proceed?").expect("ask"));
    }

    #[test]
    fn test_capabilities() {
        let ui = TerminalUi::new().with_color(false).with_debug(true);
        assert!(!ui.has_color());
        assert!(ui.debug());
    }
}
