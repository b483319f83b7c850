//! Interactive operator prompts

use crate::guest::types::{validate_vmid, GuestId};
use crate::utils::system::CancellationToken;
use std::io::{self, BufRead, Write};

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&self, question: &str) -> io::Result<bool>;
}

/// `y`/`yes` (any case) is a yes; anything else, including EOF, is a no.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// The error a prompt returns once the operator pressed Ctrl-C.
fn interrupted() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "interrupted at prompt")
}

/// Read one line, giving up if `token` was tripped before or during the read.
fn read_answer<R: BufRead>(input: &mut R, token: &CancellationToken) -> io::Result<Option<String>> {
    if token.is_cancelled() {
        return Err(interrupted());
    }
    let mut line = String::new();
    let read = {
        let _exit = token.exit_on_interrupt();
        input.read_line(&mut line)?
    };
    if token.is_cancelled() {
        return Err(interrupted());
    }
    Ok((read > 0).then_some(line))
}

/// Prompts on stdout and reads the answer from stdin.
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    token: CancellationToken,
}

impl TerminalPrompt {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Confirm for TerminalPrompt {
    fn confirm(&self, question: &str) -> io::Result<bool> {
        if self.token.is_cancelled() {
            return Err(interrupted());
        }
        print!("{question} [y/N]: ");
        io::stdout().flush()?;

        let answer = read_answer(&mut io::stdin().lock(), &self.token)?;
        Ok(answer.is_some_and(|a| is_affirmative(&a)))
    }
}

/// Answers every question with yes (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _question: &str) -> io::Result<bool> {
        Ok(true)
    }
}

/// Ask for a guest id on `output` until `input` yields a valid one or
/// `token` is tripped.
pub fn read_vmid<R: BufRead, W: Write>(
    label: &str,
    input: &mut R,
    output: &mut W,
    token: &CancellationToken,
) -> io::Result<GuestId> {
    loop {
        if token.is_cancelled() {
            return Err(interrupted());
        }
        write!(output, "Please enter the {label} guest id: ")?;
        output.flush()?;
        let Some(line) = read_answer(input, token)? else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no {label} guest id given"),
            ));
        };
        match validate_vmid(&line) {
            Some(id) => return Ok(id),
            None => writeln!(output, "Invalid guest id: {:?}", line.trim())?,
        }
    }
}

/// `given` if valid, otherwise prompt on the terminal.
pub fn prompt_vmid(label: &str, given: Option<&str>, token: &CancellationToken) -> io::Result<GuestId> {
    if let Some(id) = given.and_then(validate_vmid) {
        return Ok(id);
    }
    if let Some(raw) = given {
        println!("Invalid {label} guest id: {raw:?}");
    }
    read_vmid(label, &mut io::stdin().lock(), &mut io::stdout(), token)
}
