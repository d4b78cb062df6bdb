/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! This module defines the parse-level tree for templates. Statement nodes
//! ([`TemplateNode`]) still carry `block` and `include` structure; the
//! compiler flattens them away before code generation (see
//! [`crate::compiled`]). Expressions ([`Expr`]) are shared by both levels.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a construct in a template file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Template file (resolved path or template name).
    pub file: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::In => "in",
            BinaryOp::Concat => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// An expression inside `{{ }}`, `{! !}`, or a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal value: `"text"`, `42`, `1.5`, `true`, `null`.
    Literal(Value),

    /// A list literal: `[a, 1, "x"]`.
    List(Vec<Expr>),

    /// A context variable reference.
    Var(String),

    /// "Bound in the context and truthy"; produced for bare-identifier
    /// conditions and never reported as an undefined reference.
    Defined(String),

    /// Property access: `target.name`.
    Attr { target: Box<Expr>, name: String },

    /// Index access: `target[index]`.
    Index { target: Box<Expr>, index: Box<Expr> },

    /// Function invocation: `name(args...)`.
    Call { name: String, args: Vec<Expr> },

    /// Filter application: `target|name(args...)`.
    Filter {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },

    Unary { op: UnaryOp, operand: Box<Expr> },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn attr(target: Expr, name: impl Into<String>) -> Self {
        Expr::Attr {
            target: Box::new(target),
            name: name.into(),
        }
    }

    pub fn index(target: Expr, index: Expr) -> Self {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    pub fn filter(target: Expr, name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Filter {
            target: Box::new(target),
            name: name.into(),
            args,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    /// Visit every filter and function name used in this expression.
    pub fn visit_names(&self, on_filter: &mut dyn FnMut(&str), on_function: &mut dyn FnMut(&str)) {
        match self {
            Expr::Literal(_) | Expr::Var(_) | Expr::Defined(_) => {}
            Expr::List(items) => {
                for item in items {
                    item.visit_names(on_filter, on_function);
                }
            }
            Expr::Attr { target, .. } => target.visit_names(on_filter, on_function),
            Expr::Index { target, index } => {
                target.visit_names(on_filter, on_function);
                index.visit_names(on_filter, on_function);
            }
            Expr::Call { name, args } => {
                on_function(name);
                for arg in args {
                    arg.visit_names(on_filter, on_function);
                }
            }
            Expr::Filter { target, name, args } => {
                target.visit_names(on_filter, on_function);
                on_filter(name);
                for arg in args {
                    arg.visit_names(on_filter, on_function);
                }
            }
            Expr::Unary { operand, .. } => operand.visit_names(on_filter, on_function),
            Expr::Binary { left, right, .. } => {
                left.visit_names(on_filter, on_function);
                right.visit_names(on_filter, on_function);
            }
        }
    }
}

/// A node in the parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Literal text to be output as-is.
    Text(String),

    /// Interpolation: `{{ expr }}` (escaped) or `{! expr !}` (raw).
    Output(Output),

    /// Conditional block: `{% if %}...{% elseif %}...{% else %}...{% endif %}`
    Conditional(Conditional),

    /// For loop: `{% for x in xs %}...{% endfor %}`
    ForLoop(ForLoop),

    /// While loop: `{% while cond %}...{% endwhile %}`
    WhileLoop(WhileLoop),

    /// Assignment: `{% set name = expr %}`
    Set(Assignment),

    /// Overridable region: `{% block name %}...{% endblock %}`
    Block(Block),

    /// Sub-template reference: `{% include "name" %}`
    Include(Include),
}

/// Interpolation node.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub expr: Expr,
    /// HTML-escape the rendered value (`{{ }}`) or not (`{! !}`).
    pub escape: bool,
    pub location: SourceLocation,
}

/// Conditional block.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    /// List of (condition, body) pairs for if/elseif branches.
    pub branches: Vec<(Expr, Vec<TemplateNode>)>,
    /// Optional else branch.
    pub else_branch: Option<Vec<TemplateNode>>,
    pub location: SourceLocation,
}

/// For loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    /// Key binding for the two-name form (`for k, v in ...`).
    pub key_var: Option<String>,
    /// Value binding.
    pub value_var: String,
    /// Expression producing the iterated collection.
    pub iterable: Expr,
    pub body: Vec<TemplateNode>,
    pub location: SourceLocation,
}

/// While loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileLoop {
    pub condition: Expr,
    pub body: Vec<TemplateNode>,
    pub location: SourceLocation,
}

/// Assignment statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Expr,
    pub location: SourceLocation,
}

/// Named, overridable region.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub body: Vec<TemplateNode>,
    pub location: SourceLocation,
}

/// Include reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    /// Included template name.
    pub name: String,
    pub location: SourceLocation,
    /// Resolved template nodes (populated during compilation).
    ///
    /// This is `None` after parsing. After include expansion it holds the
    /// flattened nodes of the included template, or an empty list when the
    /// template could not be found.
    pub resolved: Option<Vec<TemplateNode>>,
}

/// The `extends` declaration of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct Extends {
    pub parent: String,
    pub location: SourceLocation,
}

/// A parsed (not yet flattened) template.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTemplate {
    pub extends: Option<Extends>,
    pub nodes: Vec<TemplateNode>,
}
