/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Render context.
//!
//! A [`TemplateContext`] is the ordered name → value mapping supplied for one
//! render call. The engine keeps its own assigned variables in a context too;
//! the two are merged per render with call-site values winning.

use crate::value::Value;
use indexmap::IndexMap;

/// Variable bindings for one render call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    variables: IndexMap<String, Value>,
}

impl TemplateContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable into the context, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Get a variable from the context.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// Variable names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }

    /// Copy every binding of `other` into this context; `other` wins on collisions.
    pub fn extend(&mut self, other: &TemplateContext) {
        for (key, value) in &other.variables {
            self.variables.insert(key.clone(), value.clone());
        }
    }

    /// Union of this context and `overrides`, with `overrides` winning on key collision.
    pub fn merged(&self, overrides: &TemplateContext) -> TemplateContext {
        let mut merged = self.clone();
        merged.extend(overrides);
        merged
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TemplateContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = TemplateContext::new();
        for (key, value) in iter {
            ctx.insert(key, value);
        }
        ctx
    }
}

impl From<IndexMap<String, Value>> for TemplateContext {
    fn from(variables: IndexMap<String, Value>) -> Self {
        Self { variables }
    }
}

impl TryFrom<serde_json::Value> for TemplateContext {
    type Error = String;

    /// Build a context from a JSON object; any other JSON value is rejected.
    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match Value::from(value) {
            Value::Map(variables) => Ok(Self { variables }),
            other => Err(format!(
                "context must be an object, got {}",
                other.type_name()
            )),
        }
    }
}
