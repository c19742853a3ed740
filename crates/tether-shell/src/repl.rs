//! The interactive prompt loop.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Handle;

use tether::{Evaluator, ProtocolError};

use crate::session::{InterruptHandle, Session};

/// Prompt for a new statement.
pub const PROMPT: &str = "> ";

/// Prompt while a statement is still open.
pub const CONTINUATION_PROMPT: &str = "* ";

/// Inputs that end the session.
pub const QUIT_WORDS: [&str; 4] = ["quit", "quit;", "exit", "exit;"];

/// One read from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line of input.
    Line(String),
    /// Ctrl+C at the prompt.
    Interrupted,
    /// End of input.
    Eof,
}

/// Where prompt input comes from.
pub trait LineSource {
    /// Show `prompt` and read one line.
    fn read_line(&mut self, prompt: &str) -> ReadOutcome;

    /// Record a submitted line.
    fn add_history(&mut self, _line: &str) {}
}

/// Line editor backed by rustyline.
pub struct EditorInput {
    editor: DefaultEditor,
}

impl std::fmt::Debug for EditorInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorInput").finish_non_exhaustive()
    }
}

impl EditorInput {
    /// Create an editor on the terminal.
    pub fn new() -> Result<Self, ReadlineError> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for EditorInput {
    fn read_line(&mut self, prompt: &str) -> ReadOutcome {
        match self.editor.readline(prompt) {
            Ok(line) => ReadOutcome::Line(line),
            Err(ReadlineError::Interrupted) => ReadOutcome::Interrupted,
            Err(ReadlineError::Eof) => ReadOutcome::Eof,
            Err(e) => {
                tracing::warn!("Failed to read input: {}", e);
                ReadOutcome::Eof
            }
        }
    }

    fn add_history(&mut self, line: &str) {
        if let Err(e) = self.editor.add_history_entry(line) {
            tracing::warn!("Failed to add history entry: {}", e);
        }
    }
}

/// Why the prompt loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplExit {
    /// The user typed a quit word.
    Quit,
    /// Input ended.
    Eof,
    /// The host closed the connection.
    Disconnected,
}

/// Run the prompt loop until the user quits or the host goes away.
///
/// Runs on a plain thread and drives `session` through `runtime`. Each
/// submitted line blocks the prompt until its reply has been printed.
pub fn run_repl(
    session: &mut Session,
    shadow: &dyn Evaluator,
    runtime: &Handle,
    input: &mut dyn LineSource,
) -> Result<ReplExit, ProtocolError> {
    let mut continuing = false;

    loop {
        let prompt = if continuing {
            CONTINUATION_PROMPT
        } else {
            PROMPT
        };

        let line = match input.read_line(prompt) {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Eof => return Ok(ReplExit::Eof),
            ReadOutcome::Interrupted => {
                runtime.block_on(session.interrupt());
                session.clear_pending();
                continuing = false;
                continue;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if QUIT_WORDS.contains(&trimmed) {
            return Ok(ReplExit::Quit);
        }
        input.add_history(&line);

        match runtime.block_on(session.submit(&line, shadow)) {
            Ok(open) => continuing = open,
            Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                eprintln!("Command not sent: {e}");
                continue;
            }
            Err(ProtocolError::Closed) => return Ok(ReplExit::Disconnected),
            Err(e) => return Err(e),
        }

        runtime.block_on(session.wait_idle());
        if session.is_closed() {
            return Ok(ReplExit::Disconnected);
        }
    }
}

/// Forward Ctrl+C to the host for as long as the shell runs.
///
/// While the prompt is reading, the line editor sees Ctrl+C itself; this
/// covers the time spent waiting for a reply.
pub async fn forward_interrupts(handle: InterruptHandle) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::debug!("Forwarding interrupt");
        handle.interrupt().await;
    }
}
