//! The built-in script evaluator.
//!
//! A small statement language: `name = expr;` binds a variable and produces
//! no value, `expr;` produces the expression's value. Variables persist
//! across calls for the lifetime of the evaluator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::lexer::Pos;
use super::parser::{BinOp, Expr, ParseError, Span, Stmt, UnOp, parse_program};
use super::{DiagnosticSink, EvalError, Evaluation, Evaluator};
use crate::format::{format_value, try_format_value};
use crate::value::{Sequence, Value, ValueMap};

/// Granularity of interrupt checks inside `sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Half-open integer range `[start, end)`, iterated lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSeq {
    /// First value.
    pub start: i64,
    /// One past the last value.
    pub end: i64,
}

impl Sequence for RangeSeq {
    fn try_iter(&self) -> Option<Box<dyn Iterator<Item = Value> + '_>> {
        Some(Box::new((self.start..self.end).map(Value::Int)))
    }

    fn describe(&self) -> String {
        format!("range({}, {})", self.start, self.end)
    }
}

/// Evaluator for the built-in script language.
#[derive(Debug, Default)]
pub struct ScriptEvaluator {
    globals: Mutex<HashMap<String, Value>>,
    interrupted: AtomicBool,
}

impl ScriptEvaluator {
    /// Create an evaluator with no variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the currently bound variables, sorted.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .globals
            .lock()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn check_interrupt(&self) -> Result<(), EvalError> {
        if self.interrupted.load(Ordering::SeqCst) {
            Err(EvalError::Interrupted)
        } else {
            Ok(())
        }
    }
}

impl Evaluator for ScriptEvaluator {
    fn evaluate(
        &self,
        input: &str,
        diagnostics: &dyn DiagnosticSink,
    ) -> Result<Evaluation, EvalError> {
        let program = match parse_program(input) {
            Ok(program) => program,
            Err(ParseError::Incomplete) => return Ok(Evaluation::incomplete(input)),
            Err(ParseError::Syntax { pos, message }) => return Err(syntax(pos, message)),
        };

        self.interrupted.store(false, Ordering::SeqCst);
        let mut globals = self
            .globals
            .lock()
            .map_err(|_| EvalError::Runtime("evaluator state is poisoned".to_string()))?;

        let mut frame = Frame {
            globals: &mut globals,
            evaluator: self,
            diagnostics,
            source: input,
        };

        let mut result = Evaluation::no_value();
        for statement in &program {
            self.check_interrupt()?;
            result = match statement {
                Stmt::Assign { name, value } => {
                    let value = frame.eval(value)?;
                    frame.globals.insert(name.clone(), value);
                    Evaluation::no_value()
                }
                Stmt::Expr(Expr::Call { name, args, span }) => {
                    match frame.call(name, args, *span)? {
                        Some(value) => Evaluation::with_value(value),
                        None => Evaluation::no_value(),
                    }
                }
                Stmt::Expr(expr) => Evaluation::with_value(frame.eval(expr)?),
            };
        }
        Ok(result)
    }

    fn continuation(&self, input: &str) -> Result<Option<String>, EvalError> {
        match parse_program(input) {
            Ok(_) => Ok(None),
            Err(ParseError::Incomplete) => Ok(Some(input.to_string())),
            Err(ParseError::Syntax { pos, message }) => Err(syntax(pos, message)),
        }
    }

    fn render(&self, value: &Value) -> Result<String, EvalError> {
        try_format_value(value, &mut || self.check_interrupt())
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

fn syntax(pos: Pos, message: String) -> EvalError {
    EvalError::Syntax {
        line: pos.line,
        column: pos.column,
        message,
    }
}

fn runtime(pos: Pos, message: impl std::fmt::Display) -> EvalError {
    EvalError::Runtime(format!("({},{}): {}", pos.line, pos.column, message))
}

/// State for one `evaluate` call.
struct Frame<'a> {
    globals: &'a mut HashMap<String, Value>,
    evaluator: &'a ScriptEvaluator,
    diagnostics: &'a dyn DiagnosticSink,
    source: &'a str,
}

impl Frame<'_> {
    fn pos(&self, span: Span) -> Pos {
        Pos::at(self.source, span.start)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        Ok(match expr {
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(x) => Value::Float(*x),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Char(c) => Value::Char(*c),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null => Value::Null,
            Expr::Var(name) => self
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::Undefined(name.clone()))?,
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Map(entries) => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Value::Map(map)
            }
            Expr::Call { name, args, span } => self.call(name, args, *span)?.ok_or_else(|| {
                runtime(self.pos(*span), format!("`{name}` does not produce a value"))
            })?,
            Expr::Unary { op, operand, span } => {
                let operand = self.eval(operand)?;
                unary(*op, operand, self.pos(*span))?
            }
            Expr::Index { .. } | Expr::Binary { .. } => self.eval_chain(expr)?,
        })
    }

    /// Operator and index chains nest to the left, one level per operator.
    /// Walk the left spine with a loop so a long `a + b + c ...` costs no
    /// stack.
    fn eval_chain(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        let mut spine = Vec::new();
        let mut head = expr;
        while let Expr::Index { target: next, .. } | Expr::Binary { left: next, .. } = head {
            spine.push(head);
            head = &**next;
        }

        let mut acc = self.eval(head)?;
        for link in spine.into_iter().rev() {
            acc = match link {
                Expr::Binary {
                    op: BinOp::And,
                    right,
                    ..
                } => Value::Bool(acc.is_truthy() && self.eval(right)?.is_truthy()),
                Expr::Binary {
                    op: BinOp::Or,
                    right,
                    ..
                } => Value::Bool(acc.is_truthy() || self.eval(right)?.is_truthy()),
                Expr::Binary { op, right, span, .. } => {
                    let right = self.eval(right)?;
                    binary(*op, acc, right, self.pos(*span))?
                }
                Expr::Index { index, span, .. } => {
                    let index = self.eval(index)?;
                    index_value(&acc, &index, self.pos(*span))?
                }
                _ => acc,
            };
        }
        Ok(acc)
    }

    fn call(&mut self, name: &str, args: &[Expr], span: Span) -> Result<Option<Value>, EvalError> {
        let pos = self.pos(span);
        let args: Vec<Value> = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<_, _>>()?;

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(runtime(
                    pos,
                    format!("`{name}` takes {expected} argument(s), got {}", args.len()),
                ))
            }
        };

        match name {
            "print" => {
                let line = args
                    .iter()
                    .map(|arg| self.plain_text(arg))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(" ");
                self.diagnostics.emit(&line);
                Ok(None)
            }
            "len" => {
                arity(1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Map(map) => map.len(),
                    Value::Seq(seq) => {
                        let iter = seq
                            .try_iter()
                            .ok_or_else(|| runtime(pos, "sequence cannot be iterated"))?;
                        let mut count = 0usize;
                        for _ in iter {
                            if count % 4096 == 0 {
                                self.evaluator.check_interrupt()?;
                            }
                            count += 1;
                        }
                        count
                    }
                    other => {
                        return Err(runtime(pos, format!("{} has no length", other.kind_name())));
                    }
                };
                Ok(Some(Value::Int(i64::try_from(len).unwrap_or(i64::MAX))))
            }
            "range" => {
                arity(2)?;
                match (&args[0], &args[1]) {
                    (Value::Int(start), Value::Int(end)) => Ok(Some(Value::Seq(Arc::new(RangeSeq {
                        start: *start,
                        end: *end,
                    })))),
                    _ => Err(runtime(pos, "`range` expects two integers")),
                }
            }
            "keys" => {
                arity(1)?;
                match &args[0] {
                    Value::Map(map) => Ok(Some(Value::Array(map.keys().cloned().collect()))),
                    other => Err(runtime(pos, format!("{} has no keys", other.kind_name()))),
                }
            }
            "chr" => {
                arity(1)?;
                let code = match &args[0] {
                    Value::Int(i) => u32::try_from(*i).ok().and_then(char::from_u32),
                    _ => None,
                };
                code.map(|c| Some(Value::Char(c)))
                    .ok_or_else(|| runtime(pos, "`chr` expects a valid character code"))
            }
            "str" => {
                arity(1)?;
                Ok(Some(Value::Str(self.plain_text(&args[0])?)))
            }
            "type" => {
                arity(1)?;
                Ok(Some(Value::Opaque(args[0].kind_name().to_string())))
            }
            "sleep" => {
                arity(1)?;
                let Value::Int(ms) = &args[0] else {
                    return Err(runtime(pos, "`sleep` expects milliseconds"));
                };
                let deadline =
                    Instant::now() + Duration::from_millis(u64::try_from(*ms).unwrap_or(0));
                loop {
                    self.evaluator.check_interrupt()?;
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(SLEEP_SLICE.min(deadline - now));
                }
            }
            _ => Err(EvalError::Undefined(name.to_string())),
        }
    }

    /// Text of a value as `print` and `str` show it: strings without quotes.
    fn plain_text(&self, value: &Value) -> Result<String, EvalError> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => self.evaluator.render(other),
        }
    }
}

fn index_value(target: &Value, index: &Value, pos: Pos) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Array(items), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| runtime(pos, format!("index {i} is out of range"))),
        (Value::Str(s), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(Value::Char)
            .ok_or_else(|| runtime(pos, format!("index {i} is out of range"))),
        (Value::Map(map), key) => map
            .get(key)
            .cloned()
            .ok_or_else(|| runtime(pos, format!("key {} not found", format_value(key)))),
        (target, index) => Err(runtime(
            pos,
            format!("cannot index {} with {}", target.kind_name(), index.kind_name()),
        )),
    }
}

fn unary(op: UnOp, operand: Value, pos: Pos) -> Result<Value, EvalError> {
    match (op, operand) {
        (UnOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| runtime(pos, "arithmetic overflow")),
        (UnOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnOp::Neg, other) => Err(runtime(pos, format!("cannot negate {}", other.kind_name()))),
    }
}

fn binary(op: BinOp, left: Value, right: Value, pos: Pos) -> Result<Value, EvalError> {
    use Value::{Array, Char, Float, Int, Str};

    let overflow = || runtime(pos, "arithmetic overflow");
    let mismatch = |l: &Value, r: &Value| {
        runtime(
            pos,
            format!(
                "operator {op:?} cannot be applied to {} and {}",
                l.kind_name(),
                r.kind_name()
            ),
        )
    };

    match op {
        BinOp::Eq => return Ok(Value::Bool(left == right)),
        BinOp::Ne => return Ok(Value::Bool(left != right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&left, &right) {
                (Int(a), Int(b)) => a.partial_cmp(b),
                (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
                (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
                (Float(a), Float(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => a.partial_cmp(b),
                (Char(a), Char(b)) => a.partial_cmp(b),
                _ => return Err(mismatch(&left, &right)),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (op, left, right) {
        (BinOp::Add, Str(a), Str(b)) => Ok(Str(a + &b)),
        (BinOp::Add, Str(mut a), Char(c)) => {
            a.push(c);
            Ok(Str(a))
        }
        (BinOp::Add, Array(mut a), Array(b)) => {
            a.extend(b);
            Ok(Array(a))
        }
        (BinOp::Add, Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or_else(overflow),
        (BinOp::Sub, Int(a), Int(b)) => a.checked_sub(b).map(Int).ok_or_else(overflow),
        (BinOp::Mul, Int(a), Int(b)) => a.checked_mul(b).map(Int).ok_or_else(overflow),
        (BinOp::Div | BinOp::Rem, Int(_), Int(0)) => Err(runtime(pos, "division by zero")),
        (BinOp::Div, Int(a), Int(b)) => a.checked_div(b).map(Int).ok_or_else(overflow),
        (BinOp::Rem, Int(a), Int(b)) => a.checked_rem(b).map(Int).ok_or_else(overflow),
        (op, l @ (Int(_) | Float(_)), r @ (Int(_) | Float(_))) => {
            let (a, b) = (as_float(&l), as_float(&r));
            match op {
                BinOp::Add => Ok(Float(a + b)),
                BinOp::Sub => Ok(Float(a - b)),
                BinOp::Mul => Ok(Float(a * b)),
                BinOp::Div => Ok(Float(a / b)),
                BinOp::Rem => Ok(Float(a % b)),
                _ => Err(mismatch(&l, &r)),
            }
        }
        (_, l, r) => Err(mismatch(&l, &r)),
    }
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(x) => *x,
        _ => f64::NAN,
    }
}
