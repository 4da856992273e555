//! The dynamic value universe consumed by constant pools.
//!
//! The value library itself — arithmetic, iteration, printing — is an
//! external collaborator (§6.3); this module only provides the narrow
//! refcounted construction surface the IR and bytecode emitter need to hold
//! literal constants (`const(v)`, `collect`'s seed array, `definedor`'s
//! `false`/`true`, the literal string `"break"` in `foreach`'s handler, and
//! so on).

use std::rc::Rc;

use indexmap::IndexMap;

/// A dynamically-typed value: null, boolean, number, string, array, or
/// object, refcounted so that `const_value` can return a cheap clone
/// (matching the "inspect, don't consume" contract of §3.5).
///
/// Object fields preserve insertion order (`IndexMap`), matching how jq's
/// own `jv` objects iterate in insertion order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<IndexMap<String, Value>>),
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Self::String(s.into())
    }

    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(items))
    }

    #[must_use]
    pub fn empty_array() -> Self {
        Self::array(Vec::new())
    }

    #[must_use]
    pub fn empty_object() -> Self {
        Self::Object(Rc::new(IndexMap::new()))
    }

    /// Appends a value to an array, cloning its backing storage only if it
    /// is shared (copy-on-write via `Rc::make_mut`), mirroring the "append
    /// to array" primitive required by §6.3.
    pub fn array_append(&mut self, item: Self) {
        match self {
            Self::Array(items) => Rc::make_mut(items).push(item),
            _ => unreachable!("array_append called on a non-array Value"),
        }
    }

    /// Sets an object field, copy-on-write, mirroring "set object field"
    /// from §6.3.
    pub fn object_set(&mut self, key: impl Into<String>, value: Self) {
        match self {
            Self::Object(fields) => {
                Rc::make_mut(fields).insert(key.into(), value);
            }
            _ => unreachable!("object_set called on a non-object Value"),
        }
    }

    /// The array length primitive required by §6.3.
    #[must_use]
    pub fn array_len(&self) -> usize {
        match self {
            Self::Array(items) => items.len(),
            _ => unreachable!("array_len called on a non-array Value"),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Number(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::Array(_) => ValueKind::Array,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// Matches the literal string used by `foreach`'s break handler (§4.2).
    #[must_use]
    pub fn is_string_eq(&self, s: &str) -> bool {
        matches!(self, Self::String(v) if &**v == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_append_is_copy_on_write() {
        let mut a = Value::empty_array();
        let shared = a.clone();
        a.array_append(Value::Number(1.0));
        assert_eq!(a.array_len(), 1);
        assert_eq!(shared.array_len(), 0);
    }

    #[test]
    fn break_literal_matches_only_exact_string() {
        let v = Value::string("break");
        assert!(v.is_string_eq("break"));
        assert!(!v.is_string_eq("Break"));
        assert!(!Value::Null.is_string_eq("break"));
    }
}
