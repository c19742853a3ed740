//! Text rendering of evaluator results.
//!
//! Rules, in precedence order:
//!
//! | value           | rendering                               |
//! |-----------------|-----------------------------------------|
//! | null            | `null`                                  |
//! | array           | `{ a, b }`, empty array is `{  }`       |
//! | bool            | `true` / `false`                        |
//! | string          | `"text"`, verbatim, no escaping          |
//! | map             | `{{ k1, v1 }, { k2, v2 }}`              |
//! | sequence        | `{ a, b }` if iteration starts          |
//! | char            | the character itself, unquoted          |
//! | anything else   | its default textual representation      |

use std::convert::Infallible;
use std::fmt::Write as _;

use crate::value::Value;

/// Nesting depth past which containers render as `...`.
pub const MAX_FORMAT_DEPTH: usize = 64;

/// How many values are rendered between calls to the `check` callback of
/// [`try_format_value`].
pub const CHECK_INTERVAL: usize = 4096;

/// Render a value as text. Never fails.
pub fn format_value(value: &Value) -> String {
    match try_format_value(value, &mut || Ok::<(), Infallible>(())) {
        Ok(text) => text,
        Err(never) => match never {},
    }
}

/// Render a value as text, calling `check` every [`CHECK_INTERVAL`] values.
///
/// Rendering stops with the first error `check` returns. Long lazy
/// sequences use this to stay cancellable.
pub fn try_format_value<E>(
    value: &Value,
    check: &mut dyn FnMut() -> Result<(), E>,
) -> Result<String, E> {
    let mut renderer = Renderer {
        out: String::new(),
        check,
        visited: 0,
    };
    renderer.value(value, 0)?;
    Ok(renderer.out)
}

struct Renderer<'a, E> {
    out: String,
    check: &'a mut dyn FnMut() -> Result<(), E>,
    visited: usize,
}

impl<E> Renderer<'_, E> {
    fn value(&mut self, value: &Value, depth: usize) -> Result<(), E> {
        self.visited += 1;
        if self.visited % CHECK_INTERVAL == 0 {
            (self.check)()?;
        }

        if depth > MAX_FORMAT_DEPTH {
            self.out.push_str("...");
            return Ok(());
        }

        match value {
            Value::Null => self.out.push_str("null"),
            Value::Array(items) => self.list(items.iter(), depth)?,
            Value::Bool(true) => self.out.push_str("true"),
            Value::Bool(false) => self.out.push_str("false"),
            Value::Str(s) => {
                self.out.push('"');
                self.out.push_str(s);
                self.out.push('"');
            }
            Value::Map(map) => {
                let last = map.len();
                self.out.push('{');
                for (i, (key, val)) in map.iter().enumerate() {
                    self.out.push_str("{ ");
                    self.value(key, depth + 1)?;
                    self.out.push_str(", ");
                    self.value(val, depth + 1)?;
                    if i + 1 != last {
                        self.out.push_str(" }, ");
                    } else {
                        self.out.push_str(" }");
                    }
                }
                self.out.push('}');
            }
            Value::Seq(seq) => match seq.try_iter() {
                Some(iter) => self.list(iter, depth)?,
                None => self.out.push_str(&seq.describe()),
            },
            Value::Char(c) => self.out.push(*c),
            Value::Int(i) => {
                let _ = write!(self.out, "{i}");
            }
            Value::Float(x) => {
                let _ = write!(self.out, "{x}");
            }
            Value::Opaque(text) => self.out.push_str(text),
        }
        Ok(())
    }

    fn list<I, V>(&mut self, items: I, depth: usize) -> Result<(), E>
    where
        I: Iterator<Item = V>,
        V: std::borrow::Borrow<Value>,
    {
        self.out.push_str("{ ");
        for (i, item) in items.enumerate() {
            if i != 0 {
                self.out.push_str(", ");
            }
            self.value(item.borrow(), depth + 1)?;
        }
        self.out.push_str(" }");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use super::*;
    use crate::value::{Sequence, ValueMap};

    struct Counting(i64);

    impl Sequence for Counting {
        fn try_iter(&self) -> Option<Box<dyn Iterator<Item = Value> + '_>> {
            Some(Box::new((0..self.0).map(Value::Int)))
        }

        fn describe(&self) -> String {
            format!("Counting({})", self.0)
        }
    }

    struct Refuses;

    impl Sequence for Refuses {
        fn try_iter(&self) -> Option<Box<dyn Iterator<Item = Value> + '_>> {
            None
        }

        fn describe(&self) -> String {
            "JsonPrimitive(7)".to_string()
        }
    }

    /// A sequence that yields itself forever.
    struct Ouroboros(Weak<Ouroboros>);

    impl Sequence for Ouroboros {
        fn try_iter(&self) -> Option<Box<dyn Iterator<Item = Value> + '_>> {
            let me = self.0.upgrade()?;
            Some(Box::new(std::iter::once(Value::Seq(me))))
        }

        fn describe(&self) -> String {
            "ouroboros".to_string()
        }
    }

    #[test]
    fn test_primitives() {
        assert_eq!(format_value(&Value::Bool(true)), "true");
        assert_eq!(format_value(&Value::Bool(false)), "false");
        assert_eq!(format_value(&Value::Null), "null");
        assert_eq!(format_value(&Value::from("hi")), "\"hi\"");
        assert_eq!(format_value(&Value::Int(4)), "4");
        assert_eq!(format_value(&Value::Float(2.5)), "2.5");
    }

    #[test]
    fn test_strings_are_not_escaped() {
        let value = Value::from("say \"hi\"\n");
        assert_eq!(format_value(&value), "\"say \"hi\"\n\"");
    }

    #[test]
    fn test_char_is_unquoted() {
        assert_eq!(format_value(&Value::Char('x')), "x");
        let value = Value::Array(vec![Value::Char('a'), Value::from("a")]);
        assert_eq!(format_value(&value), "{ a, \"a\" }");
    }

    #[test]
    fn test_nested_arrays() {
        let value = Value::Array(vec![
            Value::Int(1),
            Value::Array(vec![Value::Int(2), Value::Int(3)]),
        ]);
        assert_eq!(format_value(&value), "{ 1, { 2, 3 } }");
    }

    #[test]
    fn test_empty_array_keeps_both_spaces() {
        assert_eq!(format_value(&Value::Array(vec![])), "{  }");
    }

    #[test]
    fn test_single_entry_map() {
        let map: ValueMap = [("k".into(), "v".into())].into_iter().collect();
        assert_eq!(format_value(&Value::Map(map)), "{{ \"k\", \"v\" }}");
    }

    #[test]
    fn test_multi_entry_map() {
        let map: ValueMap = [
            ("a".into(), Value::Int(1)),
            ("b".into(), Value::Array(vec![Value::Bool(true)])),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            format_value(&Value::Map(map)),
            "{{ \"a\", 1 }, { \"b\", { true } }}"
        );
    }

    #[test]
    fn test_empty_map() {
        assert_eq!(format_value(&Value::Map(ValueMap::new())), "{}");
    }

    #[test]
    fn test_sequence_iterates() {
        let value = Value::Seq(Arc::new(Counting(3)));
        assert_eq!(format_value(&value), "{ 0, 1, 2 }");
    }

    #[test]
    fn test_failed_sequence_iteration_falls_back() {
        let value = Value::Seq(Arc::new(Refuses));
        assert_eq!(format_value(&value), "JsonPrimitive(7)");
    }

    #[test]
    fn test_self_referential_sequence_is_bounded() {
        let seq = Arc::new_cyclic(|me| Ouroboros(me.clone()));
        let rendered = format_value(&Value::Seq(seq));
        assert!(rendered.contains("..."), "rendered: {rendered}");
        assert_eq!(rendered.matches("{ ").count(), MAX_FORMAT_DEPTH + 1);
    }

    #[test]
    fn test_check_runs_while_iterating() {
        let value = Value::Seq(Arc::new(Counting(3 * CHECK_INTERVAL as i64)));
        let mut calls = 0;
        let rendered = try_format_value(&value, &mut || {
            calls += 1;
            Ok::<(), ()>(())
        });
        assert!(rendered.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_check_error_stops_rendering() {
        let value = Value::Seq(Arc::new(Counting(i64::MAX)));
        let rendered = try_format_value(&value, &mut || Err("stop"));
        assert_eq!(rendered, Err("stop"));
    }

    #[test]
    fn test_opaque_uses_its_text() {
        assert_eq!(format_value(&Value::Opaque("Vessel(Kerbal X)".into())), "Vessel(Kerbal X)");
    }
}
