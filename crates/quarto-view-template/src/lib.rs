/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiling view template engine.
//!
//! Templates are plain text with four kinds of tags:
//!
//! - `{{ expr }}`: interpolation, HTML-escaped
//! - `{! expr !}`: raw interpolation
//! - `{% stmt %}`: `if`/`elseif`/`else`, `for`, `while`, `set`, `extends`,
//!   `block`, `include`
//! - `{# ... #}`: comments
//!
//! Expressions support property and index access (`user.tags[0]`), function
//! calls, arithmetic, comparisons, `and`/`or`/`not`, and filter pipelines
//! (`name|upper|trim`).
//!
//! # Architecture
//!
//! A template is parsed into a tree, its `extends` chain is flattened into
//! the root layout, includes are spliced in, and the result is lowered into a
//! [`CompiledTemplate`] that contains only executable nodes. Compiled
//! templates are cached on disk as JSON, keyed by source path, and
//! invalidated when the source or any file it was assembled from changes.
//!
//! Missing data never aborts a production render: undefined variables,
//! properties, and keys render as empty, are logged, and are counted.
//! In development mode the first one is an error.
//!
//! # Example
//!
//! ```ignore
//! use quarto_view_template::{Engine, EngineConfig, TemplateContext};
//!
//! let engine = Engine::new(EngineConfig::new("templates").with_cache_root(".cache"));
//!
//! let mut ctx = TemplateContext::new();
//! ctx.insert("name", "World");
//!
//! let output = engine.render("hello", &ctx)?;
//! ```

pub mod ast;
pub mod cache;
pub mod compiled;
pub mod compiler;
pub mod config;
pub mod context;
pub mod controlflow;
pub mod engine;
pub mod error;
pub mod eval_context;
pub mod evaluator;
pub mod expression;
pub mod filters;
pub mod functions;
pub mod inheritance;
pub mod lexer;
pub mod loader;
pub mod registry;
pub mod telemetry;
pub mod value;

// Re-export main types at crate root
pub use ast::{Expr, SourceLocation, TemplateNode};
pub use cache::TemplateCache;
pub use compiled::{CompiledTemplate, Node};
pub use compiler::Compiler;
pub use config::{EngineConfig, RuntimeMode};
pub use context::TemplateContext;
pub use engine::{Engine, ModeOracle, RenderOptions};
pub use error::{CallError, TemplateError, TemplateResult};
pub use loader::{FileSystemLoader, MemoryLoader, TemplateLoader};
pub use registry::Registry;
pub use telemetry::{
    FanoutObserver, NoopObserver, RenderHistory, RenderObserver, RenderRecord, TracingObserver,
    UndefinedReferences,
};
pub use value::Value;
