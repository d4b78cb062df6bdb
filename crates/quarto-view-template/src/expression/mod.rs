/*
 * expression/mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Expression processor: tokenizer and recursive-descent parser producing
//! [`crate::ast::Expr`] trees.

pub mod lexer;
pub mod parser;

pub use parser::{ExprParser, parse_expression};
