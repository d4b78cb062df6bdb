/*
 * expression/parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Recursive-descent parser for the expression language.
//!
//! Precedence, lowest first:
//!
//! | level       | syntax                              |
//! |-------------|-------------------------------------|
//! | pipeline    | `expr \| filter(args) \| filter`    |
//! | or          | `or`, `\|\|`                        |
//! | and         | `and`, `&&`                         |
//! | not         | `not`, `!`                          |
//! | comparison  | `== != < <= > >= in`                |
//! | concat      | `~`                                 |
//! | additive    | `+ -`                               |
//! | term        | `* / %`                             |
//! | unary       | `-`                                 |
//! | postfix     | `.name`, `.0`, `[expr]`             |
//!
//! `not (expr)` negates only the parenthesized expression; `not expr`
//! negates everything up to the next `and`/`or`.

use super::lexer::{Token, tokenize};
use crate::ast::{BinaryOp, Expr, SourceLocation, UnaryOp};
use crate::error::{TemplateError, TemplateResult};
use crate::value::Value;

/// Parse a complete expression snippet.
pub fn parse_expression(source: &str, location: &SourceLocation) -> TemplateResult<Expr> {
    let mut parser = ExprParser::new(source, location)?;
    if parser.is_at_end() {
        return Err(TemplateError::parse("Empty expression", location));
    }
    let expr = parser.parse_pipeline()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Token-stream parser, shared with the statement compiler for statement
/// headers such as `for k, v in expr`.
pub struct ExprParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    location: &'a SourceLocation,
}

impl<'a> ExprParser<'a> {
    pub fn new(source: &'a str, location: &'a SourceLocation) -> TemplateResult<Self> {
        Ok(Self {
            source,
            tokens: tokenize(source, location)?,
            pos: 0,
            location,
        })
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume the keyword `word` if it is next.
    pub fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, token: &Token) -> TemplateResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", token.describe())))
        }
    }

    pub fn expect_ident(&mut self) -> TemplateResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) if !is_reserved(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("expected a name")),
        }
    }

    pub fn expect_string(&mut self) -> TemplateResult<String> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.unexpected("expected a quoted template name")),
        }
    }

    pub fn expect_end(&self) -> TemplateResult<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("expected end of expression"))
        }
    }

    pub fn unexpected(&self, hint: &str) -> TemplateError {
        let found = match self.peek() {
            Some(token) => format!("Unexpected {}", token.describe()),
            None => "Unexpected end".to_string(),
        };
        TemplateError::parse(
            format!("{found} in '{}' ({hint})", self.source),
            self.location,
        )
    }

    /// `or_expr ('|' name ('(' args ')')?)*`
    pub fn parse_pipeline(&mut self) -> TemplateResult<Expr> {
        let mut expr = self.parse_or()?;
        while self.eat(&Token::Pipe) {
            let name = self.expect_ident()?;
            let args = if self.peek() == Some(&Token::LParen) {
                self.parse_args()?
            } else {
                Vec::new()
            };
            expr = Expr::filter(expr, name, args);
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> TemplateResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> TemplateResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> TemplateResult<Expr> {
        if !(self.eat(&Token::Bang) || self.eat_keyword("not")) {
            return self.parse_comparison();
        }

        if self.peek() == Some(&Token::LParen) {
            // `not (a) == b` compares the negation
            let operand = self.parse_postfix()?;
            return self.parse_comparison_tail(Expr::not(operand));
        }

        let operand = self.parse_not()?;
        Ok(Expr::not(operand))
    }

    fn parse_comparison(&mut self) -> TemplateResult<Expr> {
        let left = self.parse_concat()?;
        self.parse_comparison_tail(left)
    }

    fn parse_comparison_tail(&mut self, mut left: Expr) -> TemplateResult<Expr> {
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                Some(Token::Ident(word)) if word == "in" => BinaryOp::In,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_concat()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_concat(&mut self) -> TemplateResult<Expr> {
        let mut left = self.parse_additive()?;
        while self.eat(&Token::Tilde) {
            let right = self.parse_additive()?;
            left = Expr::binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> TemplateResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_term(&mut self) -> TemplateResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> TemplateResult<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(match operand {
                Expr::Literal(Value::Int(i)) => Expr::Literal(Value::Int(-i)),
                Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
                other => Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(other),
                },
            });
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> TemplateResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.peek() {
                    Some(Token::Ident(name)) => name.clone(),
                    Some(Token::Int(i)) => i.to_string(),
                    _ => return Err(self.unexpected("expected a property name after '.'")),
                };
                self.pos += 1;
                expr = Expr::attr(expr, name);
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_pipeline()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::index(expr, index);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> TemplateResult<Expr> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.unexpected("expected a value")),
        };

        match token {
            Token::Int(i) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Int(i)))
            }
            Token::Float(f) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Float(f)))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::LParen => {
                self.pos += 1;
                let expr = self.parse_pipeline()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.pos += 1;
                self.parse_list()
            }
            Token::Ident(name) => {
                if let Some(value) = keyword_literal(&name) {
                    self.pos += 1;
                    return Ok(Expr::Literal(value));
                }
                if is_reserved(&name) {
                    return Err(self.unexpected("expected a value"));
                }
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { name, args });
                }
                Ok(Expr::Var(name))
            }
            _ => Err(self.unexpected("expected a value")),
        }
    }

    fn parse_list(&mut self) -> TemplateResult<Expr> {
        let mut items = Vec::new();
        loop {
            if self.eat(&Token::RBracket) {
                return Ok(Expr::List(items));
            }
            items.push(self.parse_pipeline()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBracket)?;
                return Ok(Expr::List(items));
            }
        }
    }

    fn parse_args(&mut self) -> TemplateResult<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_pipeline()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    /// True when the next two tokens are `name ,` or `name in`, used to
    /// recognise for-loop targets.
    pub fn at_ident_followed_by(&self, next: &Token) -> bool {
        matches!(self.peek(), Some(Token::Ident(_))) && self.peek_at(1) == Some(next)
    }
}

fn keyword_literal(name: &str) -> Option<Value> {
    match name {
        "true" | "True" => Some(Value::Bool(true)),
        "false" | "False" => Some(Value::Bool(false)),
        "null" | "none" | "None" => Some(Value::Null),
        _ => None,
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, "and" | "or" | "not" | "in") || keyword_literal(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Expr {
        parse_expression(source, &SourceLocation::default()).unwrap()
    }

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn test_property_and_index_chain() {
        assert_eq!(
            parse("a.b[0].c"),
            Expr::attr(
                Expr::index(Expr::attr(Expr::var("a"), "b"), Expr::literal(0)),
                "c"
            )
        );
        assert_eq!(parse("items.0"), Expr::attr(Expr::var("items"), "0"));
    }

    #[test]
    fn test_nested_function_calls() {
        assert_eq!(
            parse(r#"url("post", slug(post.title), 2)"#),
            call(
                "url",
                vec![
                    Expr::literal("post"),
                    call("slug", vec![Expr::attr(Expr::var("post"), "title")]),
                    Expr::literal(2),
                ]
            )
        );
    }

    #[test]
    fn test_filter_chain_threads_left_to_right() {
        assert_eq!(
            parse(r#"name|default("x")|upper|trim"#),
            Expr::filter(
                Expr::filter(
                    Expr::filter(Expr::var("name"), "default", vec![Expr::literal("x")]),
                    "upper",
                    vec![]
                ),
                "trim",
                vec![]
            )
        );
    }

    #[test]
    fn test_pipe_inside_string_is_literal() {
        assert_eq!(
            parse(r#""a|b"|upper"#),
            Expr::filter(Expr::literal("a|b"), "upper", vec![])
        );
    }

    #[test]
    fn test_pipeline_applies_to_whole_expression() {
        assert_eq!(
            parse("a ~ b|upper"),
            Expr::filter(
                Expr::binary(BinaryOp::Concat, Expr::var("a"), Expr::var("b")),
                "upper",
                vec![]
            )
        );
    }

    #[test]
    fn test_parenthesized_pipeline_in_comparison() {
        assert_eq!(
            parse("(items|length) > 2"),
            Expr::binary(
                BinaryOp::Gt,
                Expr::filter(Expr::var("items"), "length", vec![]),
                Expr::literal(2)
            )
        );
    }

    #[test]
    fn test_word_operators() {
        assert_eq!(
            parse("a and b or c"),
            Expr::binary(
                BinaryOp::Or,
                Expr::binary(BinaryOp::And, Expr::var("a"), Expr::var("b")),
                Expr::var("c")
            )
        );
        assert_eq!(parse("a && b"), parse("a and b"));
        assert_eq!(parse("!a || b"), parse("not a or b"));
    }

    #[test]
    fn test_not_bare_extends_to_next_boolean_operator() {
        assert_eq!(
            parse("not a == b and c"),
            Expr::binary(
                BinaryOp::And,
                Expr::not(Expr::binary(BinaryOp::Eq, Expr::var("a"), Expr::var("b"))),
                Expr::var("c")
            )
        );
    }

    #[test]
    fn test_not_parenthesized_negates_only_the_group() {
        assert_eq!(
            parse("not (a) == b"),
            Expr::binary(BinaryOp::Eq, Expr::not(Expr::var("a")), Expr::var("b"))
        );
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(
            parse("1 + 2 * -x"),
            Expr::binary(
                BinaryOp::Add,
                Expr::literal(1),
                Expr::binary(
                    BinaryOp::Mul,
                    Expr::literal(2),
                    Expr::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(Expr::var("x"))
                    }
                )
            )
        );
        assert_eq!(parse("-3"), Expr::literal(-3));
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("true"), Expr::literal(true));
        assert_eq!(parse("None"), Expr::Literal(Value::Null));
        assert_eq!(
            parse("[10, 20, 30]"),
            Expr::List(vec![Expr::literal(10), Expr::literal(20), Expr::literal(30)])
        );
        assert_eq!(parse("[]"), Expr::List(vec![]));
    }

    #[test]
    fn test_membership() {
        assert_eq!(
            parse(r#""admin" in user.roles"#),
            Expr::binary(
                BinaryOp::In,
                Expr::literal("admin"),
                Expr::attr(Expr::var("user"), "roles")
            )
        );
    }

    #[test]
    fn test_errors() {
        let location = SourceLocation::new("t.html", 1, 1);
        for source in ["", "a +", "f(a", "a b", "a.", "and", "a|", "[1, 2"] {
            assert!(
                parse_expression(source, &location).is_err(),
                "expected error for {source:?}"
            );
        }
    }
}
