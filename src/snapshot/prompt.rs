//! Interactive confirmation for snapshot updates.

use std::io::{BufRead, IsTerminal, Write};

/// Asks the user a yes/no question.
///
/// `None` means no answer could be obtained, which callers treat as "no".
pub trait Confirm {
    /// Asks a yes/no `question`.
    fn confirm(&self, question: &str) -> Option<bool>;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> Option<bool>,
{
    fn confirm(&self, question: &str) -> Option<bool> {
        self(question)
    }
}

/// Asks on the terminal; absent when stdin is not a terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, question: &str) -> Option<bool> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return None;
        }
        let mut stderr = std::io::stderr();
        write!(stderr, "{} [y/N] ", question).ok()?;
        stderr.flush().ok()?;

        let mut answer = String::new();
        stdin.lock().read_line(&mut answer).ok()?;
        Some(parse_answer(&answer))
    }
}

/// Never asks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl Confirm for NoPrompt {
    fn confirm(&self, _question: &str) -> Option<bool> {
        None
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    )
}
