//! Terminal confirmation prompts.

use std::io::{BufRead, Write};

use crate::deploy::Prompter;
use crate::error::Result;

/// Asks for confirmation on stderr and reads the answer from stdin.
///
/// Answering `?` prints the help text and asks again. Anything other than
/// `y` or `yes` is a refusal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    /// Creates a new terminal prompter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, message: &str, help: &str) -> Result<bool> {
        loop {
            write!(out, "{message} [y/N/?]: ")?;
            out.flush()?;

            let mut answer = String::new();
            if input.read_line(&mut answer)? == 0 {
                return Ok(false);
            }

            match answer.trim().to_ascii_lowercase().as_str() {
                "?" if !help.is_empty() => writeln!(out, "{help}")?,
                "y" | "yes" => return Ok(true),
                _ => return Ok(false),
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, message: &str, help: &str) -> Result<bool> {
        let stdin = std::io::stdin();
        Self::ask(&mut stdin.lock(), &mut std::io::stderr(), message, help)
    }
}
