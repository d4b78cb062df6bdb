/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template execution.
//!
//! Runs compiled nodes against an [`EvalContext`], appending to one output
//! buffer. Expressions evaluate to a [`Lookup`] so that missing data is
//! reported once, at the point where a value is actually consumed.

use crate::ast::{BinaryOp, Expr, SourceLocation, UnaryOp};
use crate::compiled::{Branch, Node};
use crate::error::{TemplateError, TemplateResult};
use crate::eval_context::{EvalContext, Lookup};
use crate::filters::{SAFE_FILTERS, html_escape};
use crate::value::Value;
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Evaluate a list of nodes, appending their output to `out`.
pub fn evaluate(nodes: &[Node], ctx: &mut EvalContext, out: &mut String) -> TemplateResult<()> {
    for node in nodes {
        evaluate_node(node, ctx, out)?;
    }
    Ok(())
}

fn evaluate_node(node: &Node, ctx: &mut EvalContext, out: &mut String) -> TemplateResult<()> {
    match node {
        Node::Text(text) => out.push_str(text),

        Node::Output {
            expr,
            escape,
            location,
        } => {
            let value = eval_value(expr, ctx, location)?;
            let rendered = value.render();
            if *escape && !is_safe(expr) {
                out.push_str(&html_escape(&rendered));
            } else {
                out.push_str(&rendered);
            }
        }

        Node::If {
            branches,
            else_body,
            location,
        } => evaluate_conditional(branches, else_body.as_deref(), location, ctx, out)?,

        Node::For {
            key_var,
            value_var,
            iterable,
            body,
            location,
        } => {
            let collection = eval_value(iterable, ctx, location)?;
            evaluate_for_loop(key_var.as_deref(), value_var, collection, body, ctx, out)?;
        }

        Node::While {
            condition,
            body,
            location,
        } => {
            let mut iterations = 0;
            while eval_value(condition, ctx, location)?.is_truthy() {
                iterations += 1;
                if iterations > ctx.max_loop_iterations {
                    return Err(TemplateError::LoopLimitExceeded {
                        limit: ctx.max_loop_iterations,
                        location: location.clone(),
                    });
                }
                evaluate(body, ctx, out)?;
            }
        }

        Node::Set {
            name,
            value,
            location,
        } => {
            let value = eval_value(value, ctx, location)?;
            ctx.assign(name, value);
        }
    }
    Ok(())
}

/// `{{ x|raw }}` and `{{ x|escape }}` are not escaped (again) on output.
fn is_safe(expr: &Expr) -> bool {
    matches!(expr, Expr::Filter { name, .. } if SAFE_FILTERS.contains(&name.as_str()))
}

fn evaluate_conditional(
    branches: &[Branch],
    else_body: Option<&[Node]>,
    location: &SourceLocation,
    ctx: &mut EvalContext,
    out: &mut String,
) -> TemplateResult<()> {
    for branch in branches {
        if eval_value(&branch.condition, ctx, location)?.is_truthy() {
            return evaluate(&branch.body, ctx, out);
        }
    }
    match else_body {
        Some(body) => evaluate(body, ctx, out),
        None => Ok(()),
    }
}

/// Evaluate a for loop.
///
/// Lists bind (index, item), maps bind (key, value), a truthy scalar iterates
/// once, and anything falsy iterates zero times. Each iteration sees a `loop`
/// map whose `parent` is the enclosing loop's metadata; the loop's scope is
/// dropped on exit, so the enclosing `loop` becomes visible again.
fn evaluate_for_loop(
    key_var: Option<&str>,
    value_var: &str,
    collection: Value,
    body: &[Node],
    ctx: &mut EvalContext,
    out: &mut String,
) -> TemplateResult<()> {
    let items: Vec<(Value, Value)> = match collection {
        Value::List(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| (Value::from(i), item))
            .collect(),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| (Value::String(k), v))
            .collect(),
        v if v.is_truthy() => vec![(Value::Int(0), v)],
        _ => Vec::new(),
    };

    if items.is_empty() {
        return Ok(());
    }

    let parent = ctx.lookup("loop").cloned().unwrap_or(Value::Null);
    let length = items.len();

    ctx.push_scope();
    let result = items.into_iter().enumerate().try_for_each(|(i, (key, item))| {
        ctx.bind("loop", loop_metadata(i, length, &parent));
        if let Some(key_var) = key_var {
            ctx.bind(key_var, key);
        }
        ctx.bind(value_var, item);
        evaluate(body, ctx, out)
    });
    ctx.pop_scope();
    result
}

fn loop_metadata(index0: usize, length: usize, parent: &Value) -> Value {
    let mut meta = IndexMap::new();
    meta.insert("index".to_string(), Value::from(index0 + 1));
    meta.insert("index0".to_string(), Value::from(index0));
    meta.insert("revindex".to_string(), Value::from(length - index0));
    meta.insert("revindex0".to_string(), Value::from(length - index0 - 1));
    meta.insert("first".to_string(), Value::Bool(index0 == 0));
    meta.insert("last".to_string(), Value::Bool(index0 + 1 == length));
    meta.insert("length".to_string(), Value::from(length));
    meta.insert("parent".to_string(), parent.clone());
    Value::Map(meta)
}

/// Evaluate an expression and apply the undefined-reference policy.
pub fn eval_value(expr: &Expr, ctx: &EvalContext, location: &SourceLocation) -> TemplateResult<Value> {
    let lookup = eval_expr(expr, ctx, location)?;
    ctx.resolve(lookup, location)
}

/// Evaluate an expression, carrying a miss instead of reporting it.
pub fn eval_expr(expr: &Expr, ctx: &EvalContext, location: &SourceLocation) -> TemplateResult<Lookup> {
    Ok(match expr {
        Expr::Literal(value) => Lookup::Found(value.clone()),

        Expr::List(items) => Lookup::Found(Value::List(
            items
                .iter()
                .map(|item| eval_value(item, ctx, location))
                .collect::<TemplateResult<_>>()?,
        )),

        Expr::Var(name) => match ctx.lookup(name) {
            Some(value) => Lookup::Found(value.clone()),
            None => Lookup::missing(name, format!("Undefined variable: {name}")),
        },

        Expr::Defined(name) => {
            Lookup::Found(Value::Bool(ctx.lookup(name).is_some_and(Value::is_truthy)))
        }

        Expr::Attr { target, name } => match eval_expr(target, ctx, location)? {
            Lookup::Found(value) => match value.get_attr(name) {
                Some(found) => Lookup::Found(found.clone()),
                None => Lookup::missing(
                    name,
                    format!("Undefined property: {name} on {}", value.type_name()),
                ),
            },
            missing => missing,
        },

        Expr::Index { target, index } => match eval_expr(target, ctx, location)? {
            Lookup::Found(value) => {
                let key = eval_value(index, ctx, location)?;
                match value.get_item(&key) {
                    Some(found) => Lookup::Found(found.clone()),
                    None => {
                        let key = key.render();
                        let message = format!("Undefined array key: {key} on {}", value.type_name());
                        Lookup::missing(key, message)
                    }
                }
            }
            missing => missing,
        },

        Expr::Call { name, args } => {
            let function = ctx
                .registry
                .function(name)
                .ok_or_else(|| TemplateError::UnknownFunction {
                    name: name.clone(),
                    location: location.clone(),
                })?;
            let args = eval_args(args, ctx, location)?;
            Lookup::Found(function(&args).map_err(|e| TemplateError::FunctionFailed {
                name: name.clone(),
                message: e.message,
            })?)
        }

        Expr::Filter { target, name, args } => {
            let filter = ctx
                .registry
                .filter(name)
                .ok_or_else(|| TemplateError::UnknownFilter {
                    name: name.clone(),
                    location: location.clone(),
                })?;
            let input = match eval_expr(target, ctx, location)? {
                // `default` exists to absorb missing data, so a miss is not reported
                Lookup::Missing { .. } if name == "default" => Value::Null,
                lookup => ctx.resolve(lookup, location)?,
            };
            let args = eval_args(args, ctx, location)?;
            Lookup::Found(filter(&input, &args).map_err(|e| TemplateError::InvalidFilterArgs {
                filter: name.clone(),
                message: e.message,
            })?)
        }

        Expr::Unary { op, operand } => {
            let value = eval_value(operand, ctx, location)?;
            Lookup::Found(match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Neg => match value {
                    Value::Int(i) => match i.checked_neg() {
                        Some(negated) => Value::Int(negated),
                        None => Value::Float(-(i as f64)),
                    },
                    other => Value::Float(-number(&other, "-")?),
                },
            })
        }

        Expr::Binary { op, left, right } => Lookup::Found(eval_binary(*op, left, right, ctx, location)?),
    })
}

fn eval_args(args: &[Expr], ctx: &EvalContext, location: &SourceLocation) -> TemplateResult<Vec<Value>> {
    args.iter().map(|arg| eval_value(arg, ctx, location)).collect()
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext,
    location: &SourceLocation,
) -> TemplateResult<Value> {
    let lhs = eval_value(left, ctx, location)?;

    // Short-circuit: the right side is not evaluated (or reported) when unused.
    match op {
        BinaryOp::And if !lhs.is_truthy() => return Ok(Value::Bool(false)),
        BinaryOp::Or if lhs.is_truthy() => return Ok(Value::Bool(true)),
        _ => {}
    }

    let rhs = eval_value(right, ctx, location)?;
    let ordering = || lhs.compare(&rhs);
    Ok(match op {
        BinaryOp::And | BinaryOp::Or => Value::Bool(rhs.is_truthy()),
        BinaryOp::Eq => Value::Bool(lhs.loose_eq(&rhs)),
        BinaryOp::NotEq => Value::Bool(!lhs.loose_eq(&rhs)),
        BinaryOp::Lt => Value::Bool(ordering() == Some(Ordering::Less)),
        BinaryOp::LtEq => Value::Bool(matches!(ordering(), Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => Value::Bool(ordering() == Some(Ordering::Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))),
        BinaryOp::In => Value::Bool(rhs.contains(&lhs)),
        BinaryOp::Concat => Value::String(format!("{}{}", lhs.render(), rhs.render())),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &lhs, &rhs)?
        }
    })
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> TemplateResult<Value> {
    let symbol = op.as_str();
    if let (Some(a), Some(b)) = (int_operand(lhs), int_operand(rhs)) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if b == 0 => return Err(division_by_zero(symbol)),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Div => return Ok(Value::Float(a as f64 / b as f64)),
            BinaryOp::Rem if b == 0 => return Err(division_by_zero(symbol)),
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        if let Some(result) = result {
            return Ok(Value::Int(result));
        }
    }

    let (a, b) = (number(lhs, symbol)?, number(rhs, symbol)?);
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(division_by_zero(symbol)),
        BinaryOp::Div => a / b,
        _ => a % b,
    }))
}

fn division_by_zero(symbol: &str) -> TemplateError {
    TemplateError::FunctionFailed {
        name: symbol.to_string(),
        message: "division by zero".to_string(),
    }
}

/// Integer operand: ints, null (as 0), and integer strings.
fn int_operand(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Null => Some(0),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(value: &Value, symbol: &str) -> TemplateResult<f64> {
    match value {
        Value::Null => Ok(0.0),
        Value::List(_) | Value::Map(_) => Err(not_a_number(value, symbol)),
        v => v.as_f64().ok_or_else(|| not_a_number(v, symbol)),
    }
}

fn not_a_number(value: &Value, symbol: &str) -> TemplateError {
    TemplateError::FunctionFailed {
        name: symbol.to_string(),
        message: format!("expected a number, got {} {:?}", value.type_name(), value.render()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled::lower;
    use crate::context::TemplateContext;
    use crate::controlflow::parse_template;
    use crate::registry::Registry;
    use crate::telemetry::UndefinedReferences;
    use pretty_assertions::assert_eq;

    struct Harness {
        registry: Registry,
        undefined: UndefinedReferences,
        development: bool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Registry::with_builtins(),
                undefined: UndefinedReferences::new(),
                development: false,
            }
        }

        fn development() -> Self {
            Self {
                development: true,
                ..Self::new()
            }
        }

        fn render(&self, source: &str, vars: &TemplateContext) -> TemplateResult<String> {
            let nodes = lower(parse_template(source, "t.html")?.nodes);
            let mut ctx = EvalContext::new(vars, &self.registry, &self.undefined)
                .with_development_mode(self.development)
                .with_max_loop_iterations(100);
            let mut out = String::new();
            evaluate(&nodes, &mut ctx, &mut out)?;
            Ok(out)
        }
    }

    fn render(source: &str, vars: &TemplateContext) -> String {
        Harness::new().render(source, vars).unwrap()
    }

    fn ctx() -> TemplateContext {
        TemplateContext::try_from(serde_json::json!({
            "name": "  world  ",
            "html": "<b>hi</b>",
            "user": {"name": "John", "tags": ["a", "b"]},
            "items": [10, 20, 30],
            "empty": [],
            "show": true,
            "zero": 0,
            "text": "0",
        }))
        .unwrap()
    }

    #[test]
    fn test_escaped_and_raw_output() {
        let vars = ctx();
        assert_eq!(render("{{ html }}", &vars), "&lt;b&gt;hi&lt;/b&gt;");
        assert_eq!(render("{! html !}", &vars), "<b>hi</b>");
        assert_eq!(render("{{ html|raw }}", &vars), "<b>hi</b>");
        assert_eq!(render("{{ html|e }}", &vars), "&lt;b&gt;hi&lt;/b&gt;");
    }

    #[test]
    fn test_filter_chain() {
        assert_eq!(render("{{ name|upper|trim }}", &ctx()), "WORLD");
    }

    #[test]
    fn test_property_and_index_access() {
        let vars = ctx();
        assert_eq!(render("{{ user.name }}", &vars), "John");
        assert_eq!(render("{{ user.tags[1] }}{{ user.tags.0 }}", &vars), "ba");
        assert_eq!(render("{{ user[\"name\"] }}", &vars), "John");
        assert_eq!(render("{{ items|length }}", &vars), "3");
    }

    #[test]
    fn test_loop_metadata() {
        let vars = ctx();
        assert_eq!(
            render("{% for item in [10,20,30] %}{{ loop.index }}:{{ item }};{% endfor %}", &vars),
            "1:10;2:20;3:30;"
        );
        assert_eq!(
            render("{% for item in items %}{% if loop.last %}{{ item }}{% endif %}{% endfor %}", &vars),
            "30"
        );
        assert_eq!(
            render(
                "{% for i in items %}{{ loop.index0 }}{{ loop.revindex }}{{ loop.revindex0 }}{{ loop.length }}|{% endfor %}",
                &vars
            ),
            "0323|1213|2103|"
        );
    }

    #[test]
    fn test_nested_loops_restore_parent_metadata() {
        let vars = ctx();
        let out = render(
            "{% for a in [1, 2] %}[{% for b in [\"x\", \"y\"] %}{{ loop.parent.index }}{{ b }}{% endfor %}{{ loop.index }}]{% endfor %}",
            &vars,
        );
        assert_eq!(out, "[1x1y1][2x2y2]");
        assert_eq!(render("{% for a in [1] %}{% endfor %}{{ loop|default(\"none\") }}", &vars), "none");
    }

    #[test]
    fn test_for_key_value_forms() {
        let vars = ctx();
        assert_eq!(
            render("{% for k, v in user %}{{ k }}={{ v|json }};{% endfor %}", &vars),
            "name=&quot;John&quot;;tags=[&quot;a&quot;,&quot;b&quot;];"
        );
        assert_eq!(render("{% for i, v in items %}{{ i }}{{ v }} {% endfor %}", &vars), "010 120 230 ");
        assert_eq!(render("{% for v in show %}once{% endfor %}", &vars), "once");
        assert_eq!(render("{% for v in empty %}never{% endfor %}", &vars), "");
    }

    #[test]
    fn test_conditions() {
        let vars = ctx();
        assert_eq!(render("{% if show %}yes{% else %}no{% endif %}", &vars), "yes");
        assert_eq!(render("{% if missing %}yes{% else %}no{% endif %}", &vars), "no");
        assert_eq!(render("{% if zero %}a{% elseif text %}b{% endif %}", &vars), "b");
        assert_eq!(render("{% if (items|length) > 2 and user.name == \"John\" %}ok{% endif %}", &vars), "ok");
        assert_eq!(render("{% if \"a\" in user.tags and not (zero) %}in{% endif %}", &vars), "in");
    }

    #[test]
    fn test_bare_condition_on_missing_name_is_not_reported() {
        let harness = Harness::new();
        assert_eq!(harness.render("{% if flag %}x{% endif %}", &ctx()).unwrap(), "");
        assert!(harness.undefined.snapshot().is_empty());
    }

    #[test]
    fn test_undefined_property_counts_key_once_per_occurrence() {
        let harness = Harness::new();
        let vars = ctx();
        assert_eq!(harness.render("[{{ user.missing }}]", &vars).unwrap(), "[]");
        assert_eq!(harness.undefined.count("missing"), 1);

        harness.render("{{ user.missing }}{{ user.missing.deeper }}", &vars).unwrap();
        assert_eq!(harness.undefined.count("missing"), 3);
        assert_eq!(harness.undefined.count("deeper"), 0);
    }

    #[test]
    fn test_default_absorbs_missing_values() {
        let harness = Harness::new();
        assert_eq!(
            harness.render("{{ nobody|default(\"anon\") }} {{ user.age|default(0) }}", &ctx()).unwrap(),
            "anon 0"
        );
        assert!(harness.undefined.snapshot().is_empty());
    }

    #[test]
    fn test_development_mode_raises_first_undefined_reference() {
        let harness = Harness::development();
        let err = harness.render("{{ a }}{{ b }}", &ctx()).unwrap_err();
        match err {
            TemplateError::UndefinedReference { name, location, .. } => {
                assert_eq!(name, "a");
                assert_eq!(location, SourceLocation::new("t.html", 1, 1));
            }
            other => panic!("expected undefined reference, got {other:?}"),
        }
        assert_eq!(harness.undefined.count("a"), 1);
        assert_eq!(harness.undefined.count("b"), 0);
    }

    #[test]
    fn test_set_and_while() {
        let vars = ctx();
        assert_eq!(
            render("{% set i = 0 %}{% while i < 3 %}{{ i }}{% set i = i + 1 %}{% endwhile %}", &vars),
            "012"
        );
        assert_eq!(
            render("{% set total = 0 %}{% for v in items %}{% set total = total + v %}{% endfor %}{{ total }}", &vars),
            "60"
        );
    }

    #[test]
    fn test_while_loop_limit() {
        let err = Harness::new().render("{% while show %}x{% endwhile %}", &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::LoopLimitExceeded { limit: 100, .. }));
    }

    #[test]
    fn test_arithmetic_and_concat() {
        let vars = ctx();
        assert_eq!(render("{{ 7 / 2 }} {{ 6 / 3 }} {{ 7 % 4 }} {{ 2 * 1.5 }} {{ -zero }}", &vars), "3.5 2 3 3 0");
        assert_eq!(render("{{ user.name ~ \"!\" }}", &vars), "John!");
        assert!(Harness::new().render("{{ 1 / zero }}", &vars).is_err());
    }

    #[test]
    fn test_negating_smallest_int_falls_back_to_float() {
        let mut vars = TemplateContext::new();
        vars.insert("min", Value::Int(i64::MIN));
        vars.insert("n", 5);
        assert_eq!(render("{{ -min }}", &vars), "9223372036854775808");
        assert_eq!(render("{{ -n }}", &vars), "-5");
    }

    #[test]
    fn test_functions() {
        let vars = ctx();
        assert_eq!(render("{% for n in range(1, 3) %}{{ n }}{% endfor %}", &vars), "123");
        assert_eq!(render("{{ max(items) }}", &vars), "30");
    }

    #[test]
    fn test_unknown_filter_at_execution() {
        let err = Harness::new().render("{{ name|shout }}", &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownFilter { ref name, .. } if name == "shout"));
    }
}
