/*
 * controlflow.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Statement compiler.
//!
//! Turns the scanned segment stream into a [`ParsedTemplate`] tree: nests
//! `if/elseif/else`, `for`, `while`, and `block` bodies, records `extends`, and
//! parses every expression through the expression processor.
//!
//! Conditions are lowered here: a condition that is a single bare identifier
//! becomes [`Expr::Defined`] ("bound and truthy"), so a missing flag simply
//! takes the false branch instead of reporting an undefined reference.

use crate::ast::{
    Assignment, Block, Conditional, Expr, Extends, ForLoop, Include, Output, ParsedTemplate,
    SourceLocation, TemplateNode, WhileLoop,
};
use crate::error::{TemplateError, TemplateResult};
use crate::expression::lexer::Token;
use crate::expression::{ExprParser, parse_expression};
use crate::lexer::{Segment, scan};

/// Parse template source into a tree.
///
/// # Arguments
/// * `source` - The template source text
/// * `file` - File name used in locations and error messages
pub fn parse_template(source: &str, file: &str) -> TemplateResult<ParsedTemplate> {
    let mut builder = TreeBuilder::new();
    for segment in scan(source, file)? {
        match segment {
            Segment::Text(text) => builder.push(TemplateNode::Text(text)),
            Segment::Output {
                source,
                escape,
                location,
            } => {
                let expr = parse_expression(&source, &location)?;
                builder.push(TemplateNode::Output(Output {
                    expr,
                    escape,
                    location,
                }));
            }
            Segment::Statement { source, location } => builder.statement(&source, location)?,
        }
    }
    builder.finish()
}

/// Compile an `if`/`elseif`/`while` condition.
pub fn lower_condition(expr: Expr) -> Expr {
    match expr {
        Expr::Var(name) => Expr::Defined(name),
        other => other,
    }
}

/// A statement whose body is still being collected.
#[derive(Debug)]
enum OpenStatement {
    If {
        branches: Vec<(Expr, Vec<TemplateNode>)>,
        /// Condition of the branch being collected; `None` once in `else`.
        current: Option<Expr>,
    },
    For {
        key_var: Option<String>,
        value_var: String,
        iterable: Expr,
    },
    While {
        condition: Expr,
    },
    Block {
        name: String,
    },
}

impl OpenStatement {
    fn keyword(&self) -> &'static str {
        match self {
            OpenStatement::If { .. } => "if",
            OpenStatement::For { .. } => "for",
            OpenStatement::While { .. } => "while",
            OpenStatement::Block { .. } => "block",
        }
    }
}

struct Frame {
    statement: OpenStatement,
    body: Vec<TemplateNode>,
    location: SourceLocation,
}

struct TreeBuilder {
    root: Vec<TemplateNode>,
    stack: Vec<Frame>,
    extends: Option<Extends>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            root: Vec::new(),
            stack: Vec::new(),
            extends: None,
        }
    }

    fn push(&mut self, node: TemplateNode) {
        match self.stack.last_mut() {
            Some(frame) => frame.body.push(node),
            None => self.root.push(node),
        }
    }

    fn open(&mut self, statement: OpenStatement, location: SourceLocation) {
        self.stack.push(Frame {
            statement,
            body: Vec::new(),
            location,
        });
    }

    fn statement(&mut self, source: &str, location: SourceLocation) -> TemplateResult<()> {
        let (keyword, rest) = split_keyword(source);
        match keyword {
            "if" => {
                let condition = parse_condition(rest, &location)?;
                self.open(
                    OpenStatement::If {
                        branches: Vec::new(),
                        current: Some(condition),
                    },
                    location,
                );
            }
            "elseif" | "elif" => self.else_if(rest, &location)?,
            "else" => {
                let (next, cond) = split_keyword(rest);
                match next {
                    "" => self.else_branch(&location)?,
                    "if" => self.else_if(cond, &location)?,
                    _ => return Err(TemplateError::parse("Unexpected text after 'else'", &location)),
                }
            }
            "for" => {
                let (key_var, value_var, iterable) = parse_for_header(rest, &location)?;
                self.open(
                    OpenStatement::For {
                        key_var,
                        value_var,
                        iterable,
                    },
                    location,
                );
            }
            "while" => {
                let condition = parse_condition(rest, &location)?;
                self.open(OpenStatement::While { condition }, location);
            }
            "block" => {
                let mut parser = ExprParser::new(rest, &location)?;
                let name = parser.expect_ident()?;
                parser.expect_end()?;
                self.open(OpenStatement::Block { name }, location);
            }
            "set" => {
                let mut parser = ExprParser::new(rest, &location)?;
                let name = parser.expect_ident()?;
                parser.expect(&Token::Assign)?;
                let value = parser.parse_pipeline()?;
                parser.expect_end()?;
                self.push(TemplateNode::Set(Assignment {
                    name,
                    value,
                    location,
                }));
            }
            "extends" => {
                let parent = parse_template_name(rest, &location)?;
                if self.extends.is_some() {
                    return Err(TemplateError::parse(
                        "A template can only extend one parent",
                        &location,
                    ));
                }
                self.extends = Some(Extends { parent, location });
            }
            "include" => {
                let name = parse_template_name(rest, &location)?;
                self.push(TemplateNode::Include(Include {
                    name,
                    location,
                    resolved: None,
                }));
            }
            "endif" | "endfor" | "endwhile" | "endblock" => self.close(keyword, rest, &location)?,
            "" => return Err(TemplateError::parse("Empty statement", &location)),
            other => {
                return Err(TemplateError::parse(
                    format!("Unknown statement '{other}'"),
                    &location,
                ));
            }
        }
        Ok(())
    }

    /// The innermost open `if`, provided it has not reached `else` yet.
    fn open_if(&mut self, location: &SourceLocation, keyword: &str) -> TemplateResult<&mut Frame> {
        let message = match self.stack.last().map(|frame| &frame.statement) {
            Some(OpenStatement::If {
                current: Some(_), ..
            }) => None,
            Some(OpenStatement::If { current: None, .. }) => Some(format!("'{keyword}' after 'else'")),
            _ => Some(format!("'{keyword}' without a matching 'if'")),
        };
        match (message, self.stack.last_mut()) {
            (None, Some(frame)) => Ok(frame),
            (message, _) => Err(TemplateError::parse(
                message.unwrap_or_else(|| format!("'{keyword}' without a matching 'if'")),
                location,
            )),
        }
    }

    fn else_if(&mut self, source: &str, location: &SourceLocation) -> TemplateResult<()> {
        let condition = parse_condition(source, location)?;
        let frame = self.open_if(location, "elseif")?;
        let body = std::mem::take(&mut frame.body);
        if let OpenStatement::If { branches, current } = &mut frame.statement {
            if let Some(previous) = current.replace(condition) {
                branches.push((previous, body));
            }
        }
        Ok(())
    }

    fn else_branch(&mut self, location: &SourceLocation) -> TemplateResult<()> {
        let frame = self.open_if(location, "else")?;
        let body = std::mem::take(&mut frame.body);
        if let OpenStatement::If { branches, current } = &mut frame.statement {
            if let Some(previous) = current.take() {
                branches.push((previous, body));
            }
        }
        Ok(())
    }

    fn close(&mut self, keyword: &str, rest: &str, location: &SourceLocation) -> TemplateResult<()> {
        let expected = &keyword[3..];
        let frame = match self.stack.pop() {
            Some(frame) if frame.statement.keyword() == expected => frame,
            Some(frame) => {
                let message = format!(
                    "Unexpected '{keyword}', expected 'end{}' for the statement opened at line {}",
                    frame.statement.keyword(),
                    frame.location.line
                );
                return Err(TemplateError::parse(message, location));
            }
            None => {
                return Err(TemplateError::parse(
                    format!("'{keyword}' without a matching '{expected}'"),
                    location,
                ));
            }
        };

        let Frame {
            statement,
            body,
            location: opened_at,
        } = frame;
        let node = match statement {
            OpenStatement::If {
                mut branches,
                current,
            } => {
                let else_branch = match current {
                    Some(condition) => {
                        branches.push((condition, body));
                        None
                    }
                    None => Some(body),
                };
                TemplateNode::Conditional(Conditional {
                    branches,
                    else_branch,
                    location: opened_at,
                })
            }
            OpenStatement::For {
                key_var,
                value_var,
                iterable,
            } => TemplateNode::ForLoop(ForLoop {
                key_var,
                value_var,
                iterable,
                body,
                location: opened_at,
            }),
            OpenStatement::While { condition } => TemplateNode::WhileLoop(WhileLoop {
                condition,
                body,
                location: opened_at,
            }),
            OpenStatement::Block { name } => {
                let closing_name = rest.trim();
                if !closing_name.is_empty() && closing_name != name {
                    return Err(TemplateError::parse(
                        format!("'endblock {closing_name}' closes block '{name}'"),
                        location,
                    ));
                }
                TemplateNode::Block(Block {
                    name,
                    body,
                    location: opened_at,
                })
            }
        };
        self.push(node);
        Ok(())
    }

    fn finish(self) -> TemplateResult<ParsedTemplate> {
        if let Some(frame) = self.stack.last() {
            return Err(TemplateError::parse(
                format!(
                    "Unclosed '{}' statement (missing 'end{}')",
                    frame.statement.keyword(),
                    frame.statement.keyword()
                ),
                &frame.location,
            ));
        }
        Ok(ParsedTemplate {
            extends: self.extends,
            nodes: self.root,
        })
    }
}

/// Split `keyword rest...` at the first non-identifier character.
fn split_keyword(source: &str) -> (&str, &str) {
    let source = source.trim();
    let end = source
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(source.len());
    (&source[..end], source[end..].trim())
}

fn parse_condition(source: &str, location: &SourceLocation) -> TemplateResult<Expr> {
    Ok(lower_condition(parse_expression(source, location)?))
}

/// `value in expr` or `key, value in expr`
fn parse_for_header(
    source: &str,
    location: &SourceLocation,
) -> TemplateResult<(Option<String>, String, Expr)> {
    let mut parser = ExprParser::new(source, location)?;
    let (key_var, value_var) = if parser.at_ident_followed_by(&Token::Comma) {
        let key = parser.expect_ident()?;
        parser.expect(&Token::Comma)?;
        (Some(key), parser.expect_ident()?)
    } else {
        (None, parser.expect_ident()?)
    };
    if !parser.eat_keyword("in") {
        return Err(parser.unexpected("expected 'in'"));
    }
    let iterable = parser.parse_pipeline()?;
    parser.expect_end()?;
    Ok((key_var, value_var, iterable))
}

fn parse_template_name(source: &str, location: &SourceLocation) -> TemplateResult<String> {
    let mut parser = ExprParser::new(source, location)?;
    let name = parser.expect_string()?;
    parser.expect_end()?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> ParsedTemplate {
        parse_template(source, "t.html").expect("template should parse")
    }

    fn parse_err(source: &str) -> String {
        match parse_template(source, "t.html") {
            Err(TemplateError::ParseError { message, .. }) => message,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_identifier_condition_is_lowered() {
        let parsed = parse("{% if show %}yes{% endif %}");
        match &parsed.nodes[0] {
            TemplateNode::Conditional(cond) => {
                assert_eq!(cond.branches[0].0, Expr::Defined("show".to_string()));
                assert_eq!(cond.branches[0].1, vec![TemplateNode::Text("yes".to_string())]);
                assert!(cond.else_branch.is_none());
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn test_compound_condition_is_kept() {
        let parsed = parse("{% if user.active and count > 1 %}x{% endif %}");
        match &parsed.nodes[0] {
            TemplateNode::Conditional(cond) => {
                assert!(matches!(
                    cond.branches[0].0,
                    Expr::Binary {
                        op: BinaryOp::And,
                        ..
                    }
                ));
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn test_elseif_chain() {
        let parsed = parse("{% if a %}A{% elseif b %}B{% else if c %}C{% else %}D{% endif %}");
        match &parsed.nodes[0] {
            TemplateNode::Conditional(cond) => {
                let conditions: Vec<&Expr> = cond.branches.iter().map(|(c, _)| c).collect();
                assert_eq!(
                    conditions,
                    vec![
                        &Expr::Defined("a".to_string()),
                        &Expr::Defined("b".to_string()),
                        &Expr::Defined("c".to_string()),
                    ]
                );
                assert_eq!(
                    cond.else_branch,
                    Some(vec![TemplateNode::Text("D".to_string())])
                );
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn test_for_headers() {
        let parsed = parse("{% for item in items %}{% endfor %}{% for k, v in map %}{% endfor %}");
        match (&parsed.nodes[0], &parsed.nodes[1]) {
            (TemplateNode::ForLoop(single), TemplateNode::ForLoop(pair)) => {
                assert_eq!(single.key_var, None);
                assert_eq!(single.value_var, "item");
                assert_eq!(single.iterable, Expr::var("items"));
                assert_eq!(pair.key_var.as_deref(), Some("k"));
                assert_eq!(pair.value_var, "v");
            }
            other => panic!("expected two loops, got {other:?}"),
        }
    }

    #[test]
    fn test_extends_blocks_and_include() {
        let parsed = parse(
            "{% extends \"layout\" %}{% block content %}Hi {% include \"partials/name\" %}{% endblock content %}",
        );
        assert_eq!(parsed.extends.as_ref().map(|e| e.parent.as_str()), Some("layout"));
        match &parsed.nodes[0] {
            TemplateNode::Block(block) => {
                assert_eq!(block.name, "content");
                assert!(matches!(
                    &block.body[1],
                    TemplateNode::Include(Include { name, resolved: None, .. }) if name == "partials/name"
                ));
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn test_set_statement() {
        let parsed = parse("{% set total = total + 1 %}");
        match &parsed.nodes[0] {
            TemplateNode::Set(assignment) => {
                assert_eq!(assignment.name, "total");
                assert_eq!(
                    assignment.value,
                    Expr::binary(BinaryOp::Add, Expr::var("total"), Expr::literal(1))
                );
            }
            other => panic!("expected set, got {other:?}"),
        }
    }

    #[test]
    fn test_structure_errors() {
        assert_eq!(
            parse_err("{% if a %}x"),
            "Unclosed 'if' statement (missing 'endif')"
        );
        assert_eq!(
            parse_err("{% for x in xs %}{% endif %}"),
            "Unexpected 'endif', expected 'endfor' for the statement opened at line 1"
        );
        assert_eq!(parse_err("{% endwhile %}"), "'endwhile' without a matching 'while'");
        assert_eq!(parse_err("{% if a %}{% else %}{% else %}{% endif %}"), "'else' after 'else'");
        assert_eq!(parse_err("{% macro x %}"), "Unknown statement 'macro'");
        assert_eq!(
            parse_err("{% extends \"a\" %}{% extends \"b\" %}"),
            "A template can only extend one parent"
        );
        assert_eq!(
            parse_err("{% block a %}{% endblock b %}"),
            "'endblock b' closes block 'a'"
        );
    }
}
