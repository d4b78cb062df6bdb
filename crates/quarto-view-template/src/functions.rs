/*
 * functions.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in functions.
//!
//! Hosts add their own (URL building, translation, asset paths) through
//! [`crate::Engine::add_function`] or [`crate::Engine::register_functions`].

use crate::error::CallError;
use crate::registry::Registry;
use crate::value::Value;
use std::cmp::Ordering;

/// Upper bound on the number of items `range` will produce.
const MAX_RANGE_LEN: usize = 100_000;

pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.add_function("range", range);
    registry.add_function("now", now);
    registry.add_function("max", max);
    registry.add_function("min", min);
}

/// `range(end)`, `range(start, end)`, or `range(start, end, step)`; inclusive
/// of `end` when the step lands on it. `range(end)` counts from 0 to `end - 1`.
fn range(args: &[Value]) -> Result<Value, CallError> {
    let int = |index: usize| -> Result<i64, CallError> {
        args[index].as_i64().ok_or_else(|| {
            CallError::new(format!(
                "argument {} must be a number, got {}",
                index + 1,
                args[index].type_name()
            ))
        })
    };
    let (start, end, step) = match args.len() {
        1 => (0, int(0)?.saturating_sub(1), 1),
        2 => {
            let (start, end) = (int(0)?, int(1)?);
            (start, end, if start <= end { 1 } else { -1 })
        }
        3 => (int(0)?, int(1)?, int(2)?),
        n => return Err(CallError::new(format!("expected 1 to 3 arguments, got {n}"))),
    };
    if step == 0 {
        return Err(CallError::new("step must not be zero"));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current <= end) || (step < 0 && current >= end) {
        if items.len() >= MAX_RANGE_LEN {
            return Err(CallError::new(format!("range exceeds {MAX_RANGE_LEN} items")));
        }
        items.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::List(items))
}

/// Current Unix timestamp in seconds; pipe it through `date` to format.
fn now(_args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::Int(chrono::Utc::now().timestamp()))
}

fn max(args: &[Value]) -> Result<Value, CallError> {
    extreme(args, Ordering::Greater)
}

fn min(args: &[Value]) -> Result<Value, CallError> {
    extreme(args, Ordering::Less)
}

/// `max(a, b, ...)` or `max(list)`.
fn extreme(args: &[Value], wanted: Ordering) -> Result<Value, CallError> {
    let candidates: &[Value] = match args {
        [Value::List(items)] => items,
        _ => args,
    };
    let mut best: Option<&Value> = None;
    for candidate in candidates {
        best = match best {
            None => Some(candidate),
            Some(current) => match candidate.compare(current) {
                Some(ordering) if ordering == wanted => Some(candidate),
                Some(_) => Some(current),
                None => {
                    return Err(CallError::new(format!(
                        "cannot compare {} with {}",
                        candidate.type_name(),
                        current.type_name()
                    )));
                }
            },
        };
    }
    Ok(best.cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[Value]) -> Result<Value, CallError> {
        let registry = Registry::with_builtins();
        let function = registry.function(name).unwrap();
        function(args)
    }

    #[test]
    fn test_range() {
        assert_eq!(call("range", &[Value::Int(1), Value::Int(3)]).unwrap(), Value::from(vec![1, 2, 3]));
        assert_eq!(call("range", &[Value::Int(3)]).unwrap(), Value::from(vec![0, 1, 2]));
        assert_eq!(call("range", &[Value::Int(3), Value::Int(1)]).unwrap(), Value::from(vec![3, 2, 1]));
        assert_eq!(
            call("range", &[Value::Int(0), Value::Int(10), Value::Int(5)]).unwrap(),
            Value::from(vec![0, 5, 10])
        );
        assert!(call("range", &[Value::Int(0), Value::Int(1), Value::Int(0)]).is_err());
        assert!(call("range", &[Value::from("a"), Value::Int(1)]).is_err());
        assert!(call("range", &[Value::Int(0), Value::Int(i64::MAX)]).is_err());
    }

    #[test]
    fn test_max_and_min() {
        let args = [Value::Int(3), Value::Float(7.5), Value::Int(-1)];
        assert_eq!(call("max", &args).unwrap(), Value::Float(7.5));
        assert_eq!(call("min", &args).unwrap(), Value::Int(-1));
        assert_eq!(call("max", &[Value::from(vec!["b", "c", "a"])]).unwrap(), Value::from("c"));
        assert_eq!(call("min", &[]).unwrap(), Value::Null);
        assert!(call("max", &[Value::Int(1), Value::from("x")]).is_err());
    }

    #[test]
    fn test_now_is_a_timestamp() {
        match call("now", &[]).unwrap() {
            Value::Int(ts) => assert!(ts > 1_600_000_000),
            other => panic!("expected a timestamp, got {other:?}"),
        }
    }
}
