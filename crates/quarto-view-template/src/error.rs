/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and rendering.
//!
//! Authoring mistakes (a missing template, an unknown filter or function, a
//! syntax error) surface as errors. Data gaps such as undefined variables or
//! missing includes are degraded by the engine and only become errors in
//! development mode.

use crate::ast::SourceLocation;
use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The requested template does not exist under the template root.
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    /// Error parsing the template syntax.
    #[error("Parse error at {location}: {message}")]
    ParseError {
        message: String,
        location: SourceLocation,
    },

    /// A filter name that is not registered.
    #[error("Unknown filter '{name}' at {location}")]
    UnknownFilter {
        name: String,
        location: SourceLocation,
    },

    /// A function name that is not registered.
    #[error("Unknown function '{name}' at {location}")]
    UnknownFunction {
        name: String,
        location: SourceLocation,
    },

    /// A filter rejected its input or arguments.
    #[error("Invalid arguments for filter '{filter}': {message}")]
    InvalidFilterArgs { filter: String, message: String },

    /// A function call failed.
    #[error("Function '{name}' failed: {message}")]
    FunctionFailed { name: String, message: String },

    /// An unresolved variable, property, or key, reported in development mode.
    #[error("{message} at {location}")]
    UndefinedReference {
        name: String,
        message: String,
        location: SourceLocation,
    },

    /// An `extends`/`include` chain that refers back to itself.
    #[error("Recursive template inclusion detected: {}", chain.join(" -> "))]
    RecursiveTemplate { name: String, chain: Vec<String> },

    /// Inheritance, include, or block nesting deeper than the configured limit.
    #[error("Template nesting too deep (depth > {max_depth}): {name}")]
    MaxDepthExceeded { name: String, max_depth: usize },

    /// A `while` loop that did not terminate within the iteration limit.
    #[error("Loop exceeded {limit} iterations at {location}")]
    LoopLimitExceeded {
        limit: usize,
        location: SourceLocation,
    },

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (e.g., reading a template or writing the cache).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    /// Build a parse error at the given location.
    pub fn parse(message: impl Into<String>, location: &SourceLocation) -> Self {
        TemplateError::ParseError {
            message: message.into(),
            location: location.clone(),
        }
    }
}

/// Error returned by filter and function implementations.
///
/// The engine attaches the filter or function name when converting it into a
/// [`TemplateError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallError {
    pub message: String,
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;
