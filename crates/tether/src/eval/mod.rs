//! The evaluator collaborator.
//!
//! The bridge only talks to evaluators through [`Evaluator`]: hand it a piece
//! of text, get back either an [`Evaluation`] or an [`EvalError`]. Messages
//! the evaluator produces along the way (printed output, warnings) go to a
//! [`DiagnosticSink`] supplied by the caller, so the host can route them to
//! the connection that issued the command.
//!
//! [`ScriptEvaluator`] is the built-in implementation.

mod lexer;
mod parser;
mod script;

use std::sync::Mutex;

use thiserror::Error;

use crate::format::format_value;
use crate::value::Value;

pub use script::{RangeSeq, ScriptEvaluator};

/// Outcome of evaluating one piece of input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// Text to keep buffering when the input is not yet a complete statement.
    pub continuation: Option<String>,
    /// The statement's value, if it produced one.
    pub value: Option<Value>,
}

impl Evaluation {
    /// A complete statement without a value.
    pub fn no_value() -> Self {
        Self::default()
    }

    /// A complete statement with a value.
    pub fn with_value(value: Value) -> Self {
        Self {
            continuation: None,
            value: Some(value),
        }
    }

    /// Input that needs more lines.
    pub fn incomplete(text: impl Into<String>) -> Self {
        Self {
            continuation: Some(text.into()),
            value: None,
        }
    }

    /// Whether the statement produced a value.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

/// Errors raised by an evaluator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// The input could not be parsed.
    #[error("({line},{column}): {message}")]
    Syntax {
        /// 1-based line.
        line: usize,
        /// 1-based column.
        column: usize,
        /// What went wrong.
        message: String,
    },
    /// A name was used before being assigned.
    #[error("the name `{0}` does not exist in the current context")]
    Undefined(String),
    /// Evaluation failed at runtime.
    #[error("{0}")]
    Runtime(String),
    /// Evaluation was cancelled by an interrupt request.
    #[error("evaluation was interrupted")]
    Interrupted,
}

impl EvalError {
    /// Error type name used in rendered replies.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Syntax { .. } => "SyntaxError",
            EvalError::Undefined(_) => "NameError",
            EvalError::Runtime(_) => "RuntimeError",
            EvalError::Interrupted => "InterruptedError",
        }
    }

    /// Render as `<Kind>: <message>`, the form sent back to the shell.
    pub fn render(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Receives diagnostic output produced during an evaluation.
pub trait DiagnosticSink: Send + Sync {
    /// Emit one message.
    fn emit(&self, message: &str);
}

/// Discards diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _message: &str) {}
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<String>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages emitted so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}

/// A statement/expression evaluator.
///
/// Implementations are synchronous and may block for the duration of a
/// call. [`Evaluator::interrupt`] is called from another thread while
/// [`Evaluator::evaluate`] is running and must not wait on it.
pub trait Evaluator: Send + Sync {
    /// Evaluate `input`.
    ///
    /// Incomplete input is not an error: it yields an [`Evaluation`] whose
    /// `continuation` holds the text to keep buffering.
    fn evaluate(
        &self,
        input: &str,
        diagnostics: &dyn DiagnosticSink,
    ) -> Result<Evaluation, EvalError>;

    /// Check whether `input` is a complete statement without running it.
    ///
    /// Returns the continuation text when more input is needed. The default
    /// evaluates into a [`NullSink`]; evaluators that can parse without
    /// executing should override it.
    fn continuation(&self, input: &str) -> Result<Option<String>, EvalError> {
        self.evaluate(input, &NullSink).map(|e| e.continuation)
    }

    /// Render a result value as reply text.
    ///
    /// Runs under the same conditions as [`Evaluator::evaluate`], so an
    /// interrupt can also stop a long rendering. The default never fails.
    fn render(&self, value: &Value) -> Result<String, EvalError> {
        Ok(format_value(value))
    }

    /// Ask any in-flight evaluation to stop. Best effort.
    fn interrupt(&self);
}

impl<E: Evaluator + ?Sized> Evaluator for std::sync::Arc<E> {
    fn evaluate(
        &self,
        input: &str,
        diagnostics: &dyn DiagnosticSink,
    ) -> Result<Evaluation, EvalError> {
        (**self).evaluate(input, diagnostics)
    }

    fn continuation(&self, input: &str) -> Result<Option<String>, EvalError> {
        (**self).continuation(input)
    }

    fn render(&self, value: &Value) -> Result<String, EvalError> {
        (**self).render(value)
    }

    fn interrupt(&self) {
        (**self).interrupt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_kind() {
        let err = EvalError::Syntax {
            line: 1,
            column: 4,
            message: "unexpected `)`".to_string(),
        };
        assert_eq!(err.render(), "SyntaxError: (1,4): unexpected `)`");
        assert_eq!(
            EvalError::Undefined("x".into()).render(),
            "NameError: the name `x` does not exist in the current context"
        );
        assert_eq!(
            EvalError::Interrupted.render(),
            "InterruptedError: evaluation was interrupted"
        );
    }

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.emit("one");
        sink.emit("two");
        assert_eq!(sink.messages(), vec!["one", "two"]);
    }
}
