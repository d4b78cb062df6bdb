/*
 * compiled.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled templates.
//!
//! Code generation lowers the parse tree into a flat executable form: `block`
//! wrappers are inlined, includes are spliced in, and adjacent text runs are
//! merged. A [`CompiledTemplate`] is what the cache stores on disk and what
//! the evaluator executes.

use crate::ast::{Assignment, Conditional, Expr, ForLoop, Output, SourceLocation, TemplateNode, WhileLoop};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Version of the serialized compiled form. Cache entries written with a
/// different version are treated as misses.
pub const FORMAT_VERSION: u32 = 2;

/// Executable form of a template and everything it pulled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    pub format_version: u32,
    /// Name the template was requested by.
    pub name: String,
    /// Resolved source path of the requested template.
    pub path: PathBuf,
    pub nodes: Vec<Node>,
    /// Every source file read while compiling (the template itself, its
    /// ancestors, and includes). A newer mtime on any of them invalidates a
    /// cached copy.
    pub dependencies: Vec<PathBuf>,
    /// Include paths that did not exist at compile time. Creating any of
    /// them invalidates a cached copy.
    #[serde(default)]
    pub missing_includes: Vec<PathBuf>,
}

impl CompiledTemplate {
    pub fn new(name: impl Into<String>, path: PathBuf, nodes: Vec<Node>, dependencies: Vec<PathBuf>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            name: name.into(),
            path,
            nodes,
            dependencies,
            missing_includes: Vec::new(),
        }
    }

    pub fn with_missing_includes(mut self, missing_includes: Vec<PathBuf>) -> Self {
        self.missing_includes = missing_includes;
        self
    }
}

/// An executable node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Text(String),
    Output {
        expr: Expr,
        escape: bool,
        location: SourceLocation,
    },
    If {
        branches: Vec<Branch>,
        else_body: Option<Vec<Node>>,
        location: SourceLocation,
    },
    For {
        key_var: Option<String>,
        value_var: String,
        iterable: Expr,
        body: Vec<Node>,
        location: SourceLocation,
    },
    While {
        condition: Expr,
        body: Vec<Node>,
        location: SourceLocation,
    },
    Set {
        name: String,
        value: Expr,
        location: SourceLocation,
    },
}

/// One `if`/`elseif` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
}

/// Call `f` on every expression in `nodes`, with the location of the node
/// that owns it.
pub fn visit_exprs(nodes: &[Node], f: &mut dyn FnMut(&Expr, &SourceLocation)) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Output { expr, location, .. } => f(expr, location),
            Node::If {
                branches,
                else_body,
                location,
            } => {
                for branch in branches {
                    f(&branch.condition, location);
                    visit_exprs(&branch.body, f);
                }
                if let Some(body) = else_body {
                    visit_exprs(body, f);
                }
            }
            Node::For {
                iterable,
                body,
                location,
                ..
            } => {
                f(iterable, location);
                visit_exprs(body, f);
            }
            Node::While {
                condition,
                body,
                location,
            } => {
                f(condition, location);
                visit_exprs(body, f);
            }
            Node::Set {
                value, location, ..
            } => f(value, location),
        }
    }
}

/// Lower a flattened parse tree into executable nodes.
///
/// Includes that were never resolved lower to nothing.
pub fn lower(nodes: Vec<TemplateNode>) -> Vec<Node> {
    let mut out = Vec::new();
    lower_into(nodes, &mut out);
    out
}

fn lower_into(nodes: Vec<TemplateNode>, out: &mut Vec<Node>) {
    for node in nodes {
        match node {
            TemplateNode::Text(text) => push_text(out, text),
            TemplateNode::Output(Output {
                expr,
                escape,
                location,
            }) => out.push(Node::Output {
                expr,
                escape,
                location,
            }),
            TemplateNode::Conditional(Conditional {
                branches,
                else_branch,
                location,
            }) => out.push(Node::If {
                branches: branches
                    .into_iter()
                    .map(|(condition, body)| Branch {
                        condition,
                        body: lower(body),
                    })
                    .collect(),
                else_body: else_branch.map(lower),
                location,
            }),
            TemplateNode::ForLoop(ForLoop {
                key_var,
                value_var,
                iterable,
                body,
                location,
            }) => out.push(Node::For {
                key_var,
                value_var,
                iterable,
                body: lower(body),
                location,
            }),
            TemplateNode::WhileLoop(WhileLoop {
                condition,
                body,
                location,
            }) => out.push(Node::While {
                condition,
                body: lower(body),
                location,
            }),
            TemplateNode::Set(Assignment {
                name,
                value,
                location,
            }) => out.push(Node::Set {
                name,
                value,
                location,
            }),
            TemplateNode::Block(block) => lower_into(block.body, out),
            TemplateNode::Include(include) => {
                lower_into(include.resolved.unwrap_or_default(), out);
            }
        }
    }
}

fn push_text(out: &mut Vec<Node>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(previous)) = out.last_mut() {
        previous.push_str(&text);
    } else {
        out.push(Node::Text(text));
    }
}
