/*
 * eval_context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Evaluation context for template rendering.
//!
//! This module provides [`EvalContext`], which is threaded through all evaluation
//! functions to support:
//!
//! 1. **Scopes**: loop bindings and `set` assignments layered over the render context
//! 2. **Undefined references**: the development/production policy for missing data
//! 3. **Limits**: the `while` iteration guard
//!
//! Everything here is local to one render call; nothing is shared between
//! concurrent renders except the registry and the undefined-reference counter.

use crate::ast::SourceLocation;
use crate::context::TemplateContext;
use crate::error::{TemplateError, TemplateResult};
use crate::registry::Registry;
use crate::telemetry::UndefinedReferences;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};

/// Result of evaluating an expression that may refer to missing data.
///
/// A miss is carried as a value rather than reported immediately, so that
/// only the first missing link of an accessor chain is reported and `default`
/// can absorb a miss without reporting it at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Value),
    Missing { name: String, message: String },
}

impl Lookup {
    pub fn missing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Lookup::Missing {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Context for template evaluation.
pub struct EvalContext<'a> {
    /// Variable bindings supplied for this render.
    variables: &'a TemplateContext,

    /// Scope frames, innermost last. Frame 0 holds top-level `set`
    /// assignments and is never popped.
    frames: Vec<IndexMap<String, Value>>,

    /// Filters and functions available to expressions.
    pub registry: &'a Registry,

    /// Engine-owned counter of unresolved lookups.
    undefined: &'a UndefinedReferences,

    /// Development mode: undefined references are errors.
    pub development_mode: bool,

    /// Maximum iterations of a single `while` loop.
    pub max_loop_iterations: usize,
}

impl<'a> EvalContext<'a> {
    /// Create a new evaluation context with the given variable bindings.
    pub fn new(
        variables: &'a TemplateContext,
        registry: &'a Registry,
        undefined: &'a UndefinedReferences,
    ) -> Self {
        Self {
            variables,
            frames: vec![IndexMap::new()],
            registry,
            undefined,
            development_mode: false,
            max_loop_iterations: 10_000,
        }
    }

    pub fn with_development_mode(mut self, development: bool) -> Self {
        self.development_mode = development;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    /// Look a name up through the scope frames, then the render variables.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.variables.get(name))
    }

    /// Enter a new scope (a loop body).
    pub fn push_scope(&mut self) {
        self.frames.push(IndexMap::new());
    }

    /// Leave the innermost scope, discarding its bindings.
    pub fn pop_scope(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Bind a name in the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// `set name = value`: update the nearest scope that already binds the
    /// name, otherwise the top-level scope.
    pub fn assign(&mut self, name: &str, value: Value) {
        let frame = self
            .frames
            .iter()
            .rposition(|frame| frame.contains_key(name))
            .unwrap_or(0);
        self.frames[frame].insert(name.to_string(), value);
    }

    /// Every name currently visible, render variables first.
    pub fn available_names(&self) -> Vec<String> {
        let mut names: IndexSet<&str> = self.variables.iter().map(|(k, _)| k.as_str()).collect();
        for frame in &self.frames {
            names.extend(frame.keys().map(String::as_str));
        }
        names.into_iter().map(str::to_string).collect()
    }

    /// Turn a lookup into a value, applying the undefined-reference policy to
    /// a miss.
    pub fn resolve(&self, lookup: Lookup, location: &SourceLocation) -> TemplateResult<Value> {
        match lookup {
            Lookup::Found(value) => Ok(value),
            Lookup::Missing { name, message } => {
                self.report_undefined(&name, &message, location)?;
                Ok(Value::Null)
            }
        }
    }

    /// Count a miss, then either fail (development) or log and continue.
    pub fn report_undefined(
        &self,
        name: &str,
        message: &str,
        location: &SourceLocation,
    ) -> TemplateResult<()> {
        self.undefined.record(name, message, location);

        if self.development_mode {
            return Err(TemplateError::UndefinedReference {
                name: name.to_string(),
                message: message.to_string(),
                location: location.clone(),
            });
        }

        tracing::warn!(
            reference = name,
            detail = message,
            file = %location.file,
            line = location.line,
            available = ?self.available_names(),
            "Undefined reference"
        );
        Ok(())
    }
}
