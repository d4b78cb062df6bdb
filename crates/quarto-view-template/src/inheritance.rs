/*
 * inheritance.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Block inheritance.
//!
//! A child template that `extends` a parent contributes only its blocks. The
//! compiler walks the chain from the child to the root layout, collecting a
//! [`BlockMap`] on the way: the child's blocks first, then each ancestor adds
//! the blocks no descendant has defined. The root layout's tree is then
//! rewritten so every `block` carries the body chosen from the map, or its own
//! default body.

use crate::ast::{Block, Conditional, ForLoop, TemplateNode, WhileLoop};
use crate::error::{TemplateError, TemplateResult};
use indexmap::IndexMap;

/// Block name → body, as overridden by the most-derived template.
pub type BlockMap = IndexMap<String, Vec<TemplateNode>>;

/// Which definition wins when a name is already present in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// Later definitions replace earlier ones (blocks within one template).
    Replace,
    /// Existing definitions are kept (an ancestor never overrides a descendant).
    KeepExisting,
}

/// Collect every block defined in `nodes`, in document order.
///
/// Nested blocks are collected too, so a child can override a block that the
/// parent only declares inside another block.
pub fn collect_blocks(nodes: &[TemplateNode], blocks: &mut BlockMap, precedence: Precedence) {
    for node in nodes {
        match node {
            // An outer block wins over a same-named block nested inside it.
            TemplateNode::Block(Block { name, body, .. }) => match precedence {
                Precedence::Replace => {
                    collect_blocks(body, blocks, precedence);
                    blocks.insert(name.clone(), body.clone());
                }
                Precedence::KeepExisting => {
                    if !blocks.contains_key(name) {
                        blocks.insert(name.clone(), body.clone());
                    }
                    collect_blocks(body, blocks, precedence);
                }
            },
            TemplateNode::Conditional(Conditional {
                branches,
                else_branch,
                ..
            }) => {
                for (_, body) in branches {
                    collect_blocks(body, blocks, precedence);
                }
                if let Some(body) = else_branch {
                    collect_blocks(body, blocks, precedence);
                }
            }
            TemplateNode::ForLoop(ForLoop { body, .. })
            | TemplateNode::WhileLoop(WhileLoop { body, .. }) => {
                collect_blocks(body, blocks, precedence);
            }
            TemplateNode::Text(_)
            | TemplateNode::Output(_)
            | TemplateNode::Set(_)
            | TemplateNode::Include(_) => {}
        }
    }
}

/// Substitute overridden block bodies into the root layout's tree.
///
/// A block nested inside a body that already fills the same name keeps its
/// own body, so an override that re-declares its block cannot recurse.
pub fn apply_blocks(
    nodes: Vec<TemplateNode>,
    blocks: &BlockMap,
    max_depth: usize,
) -> TemplateResult<Vec<TemplateNode>> {
    let mut active = Vec::new();
    substitute(nodes, blocks, &mut active, max_depth)
}

fn substitute(
    nodes: Vec<TemplateNode>,
    blocks: &BlockMap,
    active: &mut Vec<String>,
    max_depth: usize,
) -> TemplateResult<Vec<TemplateNode>> {
    nodes
        .into_iter()
        .map(|node| substitute_node(node, blocks, active, max_depth))
        .collect()
}

fn substitute_node(
    node: TemplateNode,
    blocks: &BlockMap,
    active: &mut Vec<String>,
    max_depth: usize,
) -> TemplateResult<TemplateNode> {
    Ok(match node {
        TemplateNode::Block(Block {
            name,
            body,
            location,
        }) => {
            if active.len() >= max_depth {
                return Err(TemplateError::MaxDepthExceeded { name, max_depth });
            }
            let chosen = if active.contains(&name) {
                body
            } else {
                blocks.get(&name).cloned().unwrap_or(body)
            };
            active.push(name.clone());
            let body = substitute(chosen, blocks, active, max_depth);
            active.pop();
            TemplateNode::Block(Block {
                name,
                body: body?,
                location,
            })
        }
        TemplateNode::Conditional(Conditional {
            branches,
            else_branch,
            location,
        }) => TemplateNode::Conditional(Conditional {
            branches: branches
                .into_iter()
                .map(|(cond, body)| Ok((cond, substitute(body, blocks, active, max_depth)?)))
                .collect::<TemplateResult<_>>()?,
            else_branch: else_branch
                .map(|body| substitute(body, blocks, active, max_depth))
                .transpose()?,
            location,
        }),
        TemplateNode::ForLoop(ForLoop {
            key_var,
            value_var,
            iterable,
            body,
            location,
        }) => TemplateNode::ForLoop(ForLoop {
            key_var,
            value_var,
            iterable,
            body: substitute(body, blocks, active, max_depth)?,
            location,
        }),
        TemplateNode::WhileLoop(WhileLoop {
            condition,
            body,
            location,
        }) => TemplateNode::WhileLoop(WhileLoop {
            condition,
            body: substitute(body, blocks, active, max_depth)?,
            location,
        }),
        other => other,
    })
}
