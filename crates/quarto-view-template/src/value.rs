/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template values.
//!
//! [`Value`] is the single dynamic type flowing through expressions, filters,
//! and functions. Host data enters either through the `From` conversions or
//! through [`Value::from_serialize`], which turns any `serde::Serialize` struct
//! into a map so templates read struct fields and map keys the same way.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A value that can be used in template evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A null/missing value.
    Null,

    /// A boolean value.
    Bool(bool),

    /// An integer value.
    Int(i64),

    /// A floating point value.
    Float(f64),

    /// A string value.
    String(String),

    /// A list of values.
    List(Vec<Value>),

    /// An ordered map of string keys to values.
    Map(IndexMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Convert any serializable host value into a template value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Value> {
        serde_json::to_value(value).map(Value::from)
    }

    /// Check if this value is "truthy" for conditional evaluation.
    ///
    /// - `null`, `false`, `0`, `0.0`, `""`, `[]`, and `{}` are falsy
    /// - everything else is truthy (including the string `"0"`)
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's type, used in filter error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Look up a property by name.
    ///
    /// Maps are looked up by key; lists accept a numeric property (`items.0`).
    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(name),
            Value::List(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Look up an element by index or key (`items[0]`, `map["key"]`).
    pub fn get_item(&self, key: &Value) -> Option<&Value> {
        match (self, key) {
            (Value::List(items), Value::Int(i)) => {
                usize::try_from(*i).ok().and_then(|i| items.get(i))
            }
            (Value::List(items), Value::String(s)) => {
                s.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (Value::Map(m), Value::String(s)) => m.get(s),
            (Value::Map(m), Value::Int(i)) => m.get(&i.to_string()),
            _ => None,
        }
    }

    /// Length of a string (in characters), list, or map.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; numeric strings are accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer view of the value; floats are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            _ => None,
        }
    }

    /// Render this value as a string for output.
    ///
    /// - String: returned as-is
    /// - Bool: "true" or "" (empty for false)
    /// - Int/Float: decimal notation
    /// - List/Map: compact JSON
    /// - Null: ""
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => self.to_json().to_string(),
        }
    }

    /// Convert to a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Loose equality: numbers compare by value regardless of int/float.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    /// Ordering for comparison operators. `None` when the values are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Membership test used by the `in` operator.
    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Value::List(items) => items.iter().any(|item| item.loose_eq(needle)),
            Value::Map(m) => m.contains_key(&needle.render()),
            Value::String(s) => s.contains(&needle.render()),
            _ => false,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
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

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());

        assert!(Value::from("hello").is_truthy());
        assert!(Value::from("0").is_truthy()); // "0" string is truthy
        assert!(!Value::from("").is_truthy());

        assert!(Value::from(vec![false]).is_truthy()); // non-empty list
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Map(IndexMap::new()).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Int(42).render(), "42");
        assert_eq!(Value::Float(2.5).render(), "2.5");
        assert_eq!(Value::Float(3.0).render(), "3");
        assert_eq!(Value::Bool(false).render(), "");
        assert_eq!(Value::from(vec![1, 2]).render(), "[1,2]");
        assert_eq!(Value::Null.render(), "");
    }

    #[test]
    fn test_struct_and_map_access_are_unified() {
        #[derive(Serialize)]
        struct User {
            name: String,
            tags: Vec<String>,
        }

        let user = Value::from_serialize(&User {
            name: "John".to_string(),
            tags: vec!["admin".to_string()],
        })
        .unwrap();

        assert_eq!(user.get_attr("name"), Some(&Value::from("John")));
        assert_eq!(
            user.get_attr("tags").and_then(|t| t.get_item(&Value::Int(0))),
            Some(&Value::from("admin"))
        );
        assert_eq!(user.get_attr("missing"), None);
        assert_eq!(user.get_item(&Value::from("name")), Some(&Value::from("John")));
    }

    #[test]
    fn test_list_access() {
        let list = Value::from(vec!["a", "b"]);
        assert_eq!(list.get_attr("1"), Some(&Value::from("b")));
        assert_eq!(list.get_item(&Value::Int(5)), None);
        assert_eq!(list.get_item(&Value::Int(-1)), None);
    }

    #[test]
    fn test_compare_and_equality() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from("1").compare(&Value::Int(1)), None);
        assert!(Value::Int(2).loose_eq(&Value::Float(2.0)));
        assert!(!Value::Int(2).loose_eq(&Value::from("2")));
    }

    #[test]
    fn test_json_conversion_keeps_key_order() {
        let json = serde_json::json!({"z": 1, "a": [true, null], "m": 1.5});
        let value = Value::from(json.clone());
        match &value {
            Value::Map(m) => {
                let keys: Vec<&str> = m.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["z", "a", "m"]);
            }
            other => panic!("expected map, got {:?}", other),
        }
        assert_eq!(value.to_json(), json);
    }
}
