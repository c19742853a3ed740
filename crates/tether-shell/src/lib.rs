//! Tether shell
//!
//! Console front end for a Tether host. Lines typed at the prompt are sent
//! to the host as-is; replies are printed by a background receiver while the
//! prompt waits. A local shadow evaluator, loaded with the same resources as
//! the host, decides whether a line completes a statement or the shell should
//! keep reading.

mod repl;
mod session;

pub use repl::{
    CONTINUATION_PROMPT, EditorInput, LineSource, PROMPT, QUIT_WORDS, ReadOutcome, ReplExit,
    forward_interrupts, run_repl,
};
pub use session::{InterruptHandle, LoadReport, LockState, Session};
