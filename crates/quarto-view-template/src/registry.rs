/*
 * registry.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Filter and function tables.
//!
//! Filters take the piped value plus extra arguments; functions take only
//! their arguments. Both tables are keyed by name, so registering a name
//! again replaces the previous entry.

use crate::error::CallError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A filter: `value|name(args...)`.
pub type FilterFn = dyn Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync;

/// A function: `name(args...)`.
pub type FunctionFn = dyn Fn(&[Value]) -> Result<Value, CallError> + Send + Sync;

/// Named filters and functions available to templates.
#[derive(Clone, Default)]
pub struct Registry {
    filters: HashMap<String, Arc<FilterFn>>,
    functions: HashMap<String, Arc<FunctionFn>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in filters and functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::filters::register_builtins(&mut registry);
        crate::functions::register_builtins(&mut registry);
        registry
    }

    pub fn add_filter<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn add_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Copy every entry of `other` into this registry, replacing same-named entries.
    pub fn extend(&mut self, other: &Registry) {
        for (name, filter) in &other.filters {
            self.filters.insert(name.clone(), Arc::clone(filter));
        }
        for (name, function) in &other.functions {
            self.functions.insert(name.clone(), Arc::clone(function));
        }
    }

    pub fn filter(&self, name: &str) -> Option<&Arc<FilterFn>> {
        self.filters.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<FunctionFn>> {
        self.functions.get(name)
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered filter names, sorted.
    pub fn filter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("filters", &self.filter_names())
            .field("functions", &self.function_names())
            .finish()
    }
}
