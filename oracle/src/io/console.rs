//! Operator I/O.
//!
//! Product output goes to stdout, one plain line at a time. Input is read a
//! line at a time; `None` means the input stream ended.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::debug;

pub trait Prompter {
    /// Ask a question and return the trimmed answer, or `None` at end of input.
    fn ask(&mut self, question: &str) -> Result<Option<String>>;

    /// Like [`Prompter::ask`] but without echoing the answer.
    fn ask_secret(&mut self, question: &str) -> Result<Option<String>>;

    fn say(&mut self, line: &str);
}

/// Ask a yes/no question. Anything but `y`/`yes` is a no.
pub fn confirm(prompter: &mut dyn Prompter, question: &str) -> Result<Option<bool>> {
    let answer = prompter.ask(&format!("{question} (y/n)"))?;
    Ok(answer.map(|a| matches!(a.to_lowercase().as_str(), "y" | "yes")))
}

/// Ask until a non-empty answer arrives. `None` at end of input.
pub fn ask_required(prompter: &mut dyn Prompter, question: &str) -> Result<Option<String>> {
    loop {
        match prompter.ask(question)? {
            None => return Ok(None),
            Some(answer) if answer.is_empty() => prompter.say("A value is required."),
            Some(answer) => return Ok(Some(answer)),
        }
    }
}

/// Prompter bound to the process stdin/stdout.
#[derive(Debug, Default)]
pub struct StdPrompter;

impl StdPrompter {
    fn read_line(&self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read stdin")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn print_prompt(&self, question: &str) -> Result<()> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question} ").context("write prompt")?;
        stdout.flush().context("flush stdout")
    }
}

impl Prompter for StdPrompter {
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        self.print_prompt(question)?;
        self.read_line()
    }

    fn ask_secret(&mut self, question: &str) -> Result<Option<String>> {
        self.print_prompt(question)?;
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal, reading secret as a plain line");
            return self.read_line();
        }
        let secret = read_hidden()?;
        println!();
        Ok(secret)
    }

    fn say(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Leaves raw mode when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            debug!(error = %err, "failed to disable raw mode");
        }
    }
}

fn read_hidden() -> Result<Option<String>> {
    let _guard = RawModeGuard::enable()?;
    let mut secret = String::new();
    loop {
        let Event::Key(key) = event::read().context("read key")? else {
            continue;
        };
        match apply_key(&mut secret, key) {
            KeyStep::Continue => {}
            KeyStep::Done => return Ok(Some(secret)),
            KeyStep::Abort => return Ok(None),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum KeyStep {
    Continue,
    Done,
    Abort,
}

fn apply_key(buffer: &mut String, key: KeyEvent) -> KeyStep {
    if key.kind == KeyEventKind::Release {
        return KeyStep::Continue;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => KeyStep::Done,
        KeyCode::Char('c' | 'd') if ctrl => KeyStep::Abort,
        KeyCode::Esc => KeyStep::Abort,
        KeyCode::Backspace => {
            buffer.pop();
            KeyStep::Continue
        }
        KeyCode::Char(c) if !ctrl => {
            buffer.push(c);
            KeyStep::Continue
        }
        _ => KeyStep::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedPrompter;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn hidden_input_handles_editing_keys() {
        let mut buf = String::new();
        for c in "tokex".chars() {
            assert_eq!(apply_key(&mut buf, key(KeyCode::Char(c))), KeyStep::Continue);
        }
        apply_key(&mut buf, key(KeyCode::Backspace));
        apply_key(&mut buf, key(KeyCode::Char('n')));
        assert_eq!(apply_key(&mut buf, key(KeyCode::Enter)), KeyStep::Done);
        assert_eq!(buf, "token");
    }

    #[test]
    fn ctrl_c_aborts_hidden_input() {
        let mut buf = String::new();
        let step = apply_key(
            &mut buf,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        );
        assert_eq!(step, KeyStep::Abort);
        assert!(buf.is_empty());
    }

    #[test]
    fn confirm_accepts_only_yes() {
        let mut prompter = ScriptedPrompter::new(["Y", "yes", "n", "maybe"]);
        assert_eq!(confirm(&mut prompter, "ok?").expect("ask"), Some(true));
        assert_eq!(confirm(&mut prompter, "ok?").expect("ask"), Some(true));
        assert_eq!(confirm(&mut prompter, "ok?").expect("ask"), Some(false));
        assert_eq!(confirm(&mut prompter, "ok?").expect("ask"), Some(false));
        assert_eq!(confirm(&mut prompter, "ok?").expect("ask"), None);
    }

    #[test]
    fn required_answers_repeat_until_given() {
        let mut prompter = ScriptedPrompter::new(["", "  ", "Todo"]);
        assert_eq!(
            ask_required(&mut prompter, "Project?").expect("ask"),
            Some("Todo".to_string())
        );
        assert_eq!(prompter.output_lines(), ["A value is required.", "A value is required."]);
    }
}
