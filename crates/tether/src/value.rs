//! Runtime values produced by an evaluator.
//!
//! [`Value`] is the model the [`format`](crate::format) routine walks. It
//! covers the shapes an evaluator can hand back: scalars, strings and
//! characters, ordered arrays, key/value maps, lazily iterated sequences and
//! opaque host objects that only know how to describe themselves.

use std::fmt;
use std::sync::Arc;

/// A lazily iterated value.
///
/// Some values look iterable but refuse to start iterating (a closed cursor,
/// a primitive that happens to implement the iteration interface). The
/// formatter tries [`Sequence::try_iter`] and falls back to
/// [`Sequence::describe`] when that fails.
pub trait Sequence: Send + Sync {
    /// Start iterating, or `None` if iteration cannot start.
    fn try_iter(&self) -> Option<Box<dyn Iterator<Item = Value> + '_>>;

    /// Default textual representation of the value.
    fn describe(&self) -> String;
}

/// A value returned by an evaluator.
#[derive(Clone)]
pub enum Value {
    /// Absence of a value (`null`).
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Multi-character string.
    Str(String),
    /// Single character.
    Char(char),
    /// Ordered, indexable sequence.
    Array(Vec<Value>),
    /// Key/value mapping with unique keys.
    Map(ValueMap),
    /// Lazily iterated sequence.
    Seq(Arc<dyn Sequence>),
    /// Host object with only a textual representation.
    Opaque(String),
}

impl Value {
    /// Short name of the value's kind, as reported by the `type` builtin.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Char(_) => "char",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Seq(_) => "sequence",
            Value::Opaque(_) => "object",
        }
    }

    /// Truthiness used by logical operators.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Char(_) | Value::Seq(_) | Value::Opaque(_) => true,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Char(c) => f.debug_tuple("Char").field(c).finish(),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Seq(seq) => f.debug_tuple("Seq").field(&seq.describe()).finish(),
            Value::Opaque(text) => f.debug_tuple("Opaque").field(text).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => Arc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::format::format_value(self))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

/// Insertion-ordered map with unique keys.
///
/// Iteration order is insertion order; re-inserting an existing key replaces
/// its value in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry. Returns the previous value for the key.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Iterate keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_insert_replaces_existing_key() {
        let mut map = ValueMap::new();
        assert!(map.insert("a".into(), Value::Int(1)).is_none());
        assert!(map.insert("b".into(), Value::Int(2)).is_none());
        assert_eq!(map.insert("a".into(), Value::Int(3)), Some(Value::Int(1)));

        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(map.get(&"a".into()), Some(&Value::Int(3)));
    }

    #[test]
    fn test_int_float_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Str("2".into()));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Char('x').is_truthy());
        assert!(Value::Int(-1).is_truthy());
    }
}
