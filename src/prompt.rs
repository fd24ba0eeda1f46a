//! Operator interaction seam
//!
//! The login and the conversation menu need answers from a person. They go
//! through [`Prompter`] so the core never touches the terminal directly.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use crate::error::{Error, Result};

/// Source of interactive answers.
pub trait Prompter {
    /// Show informational text (menus, notices).
    fn show(&mut self, text: &str) -> Result<()>;

    /// Ask a question and return the trimmed answer.
    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Line-based prompter over any reader/writer pair.
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompter<io::StdinLock<'static>, io::Stdout> {
    /// Prompter bound to the process stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn show(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{}", text)?;
        self.output.flush()?;
        Ok(())
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(Error::InvalidArgument(format!(
                "input closed while waiting for: {}",
                question.trim()
            )));
        }
        Ok(line.trim().to_string())
    }
}

/// Prompter answering from a fixed script; records what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub questions: Vec<String>,
    pub shown: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            questions: Vec::new(),
            shown: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn show(&mut self, text: &str) -> Result<()> {
        self.shown.push(text.to_string());
        Ok(())
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        self.questions.push(question.to_string());
        self.answers
            .pop_front()
            .map(|a| a.trim().to_string())
            .ok_or_else(|| Error::InvalidArgument(format!("no answer for: {}", question.trim())))
    }
}
