/*
 * filters.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in filters.
//!
//! Filters never see "undefined": a missing value arrives as [`Value::Null`],
//! which is what lets `default` substitute a fallback.

use crate::error::CallError;
use crate::registry::Registry;
use crate::value::Value;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime};
use std::fmt::Write;

/// Filters whose output is already safe HTML (or deliberately raw) and must
/// not be escaped again by `{{ }}`.
pub const SAFE_FILTERS: &[&str] = &["raw", "escape", "e"];

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.add_filter("upper", upper);
    registry.add_filter("lower", lower);
    registry.add_filter("capitalize", capitalize);
    registry.add_filter("title", title);
    registry.add_filter("trim", trim);
    registry.add_filter("escape", escape);
    registry.add_filter("e", escape);
    registry.add_filter("striptags", striptags);
    registry.add_filter("nl2br", nl2br);
    registry.add_filter("abs", abs);
    registry.add_filter("round", round);
    registry.add_filter("number_format", number_format);
    registry.add_filter("length", length);
    registry.add_filter("count", length);
    registry.add_filter("join", join);
    registry.add_filter("first", first);
    registry.add_filter("last", last);
    registry.add_filter("keys", keys);
    registry.add_filter("values", values);
    registry.add_filter("reverse", reverse);
    registry.add_filter("truncate", truncate);
    registry.add_filter("replace", replace);
    registry.add_filter("split", split);
    registry.add_filter("date", date);
    registry.add_filter("default", default);
    registry.add_filter("json_encode", json_encode);
    registry.add_filter("json", json_encode);
    registry.add_filter("json_decode", json_decode);
    registry.add_filter("url_encode", url_encode);
    registry.add_filter("url_decode", url_decode);
    registry.add_filter("dump", dump);
    registry.add_filter("raw", raw);
}

/// Escape the five HTML-significant characters.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn arg_str(args: &[Value], index: usize) -> Option<String> {
    args.get(index).filter(|v| !v.is_null()).map(Value::render)
}

fn arg_i64(args: &[Value], index: usize, filter: &str) -> Result<Option<i64>, CallError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            CallError::new(format!(
                "{filter}: argument {} must be a number, got {}",
                index + 1,
                v.type_name()
            ))
        }),
    }
}

fn number(value: &Value, filter: &str) -> Result<f64, CallError> {
    match value {
        Value::Null => Ok(0.0),
        v => v
            .as_f64()
            .ok_or_else(|| CallError::new(format!("{filter}: expected a number, got {}", v.type_name()))),
    }
}

fn upper(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::String(value.render().to_uppercase()))
}

fn lower(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::String(value.render().to_lowercase()))
}

fn capitalize(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    let s = value.render();
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    Ok(Value::String(out))
}

fn title(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    let mut out = String::new();
    let mut at_word_start = true;
    for c in value.render().chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = c.is_whitespace() || c == '-';
        }
    }
    Ok(Value::String(out))
}

/// `trim` or `trim(chars)`
fn trim(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let s = value.render();
    let trimmed = match arg_str(args, 0) {
        Some(chars) => s.trim_matches(|c: char| chars.contains(c)).to_string(),
        None => s.trim().to_string(),
    };
    Ok(Value::String(trimmed))
}

fn escape(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::String(html_escape(&value.render())))
}

fn striptags(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    let s = value.render();
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    Ok(Value::String(out))
}

fn nl2br(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::String(value.render().replace('\n', "<br />\n")))
}

fn abs(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    match value {
        Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
        v => Ok(Value::Float(number(v, "abs")?.abs())),
    }
}

/// `round(precision = 0, method = "common" | "ceil" | "floor")`
fn round(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let n = number(value, "round")?;
    let precision = arg_i64(args, 0, "round")?.unwrap_or(0);
    let precision = i32::try_from(precision).map_err(|_| CallError::new("round: precision out of range"))?;
    let factor = 10f64.powi(precision);
    let scaled = n * factor;
    let rounded = match arg_str(args, 1).as_deref() {
        None | Some("common") => scaled.round(),
        Some("ceil") => scaled.ceil(),
        Some("floor") => scaled.floor(),
        Some(other) => {
            return Err(CallError::new(format!(
                "round: method must be common, ceil, or floor, got '{other}'"
            )));
        }
    } / factor;
    if precision <= 0 {
        Ok(Value::Int(rounded as i64))
    } else {
        Ok(Value::Float(rounded))
    }
}

/// `number_format(decimals = 0, decimal_point = ".", thousands_separator = ",")`
fn number_format(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let n = number(value, "number_format")?;
    let decimals = usize::try_from(arg_i64(args, 0, "number_format")?.unwrap_or(0))
        .map_err(|_| CallError::new("number_format: decimals must not be negative"))?;
    let decimal_point = arg_str(args, 1).unwrap_or_else(|| ".".to_string());
    let separator = arg_str(args, 2).unwrap_or_else(|| ",".to_string());

    let formatted = format!("{:.*}", decimals, n.abs());
    let (int_part, fraction) = match formatted.split_once('.') {
        Some((int_part, fraction)) => (int_part, Some(fraction)),
        None => (formatted.as_str(), None),
    };

    let mut out = String::new();
    if n < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    let digits = int_part.len();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (digits - i) % 3 == 0 {
            out.push_str(&separator);
        }
        out.push(c);
    }
    if let Some(fraction) = fraction {
        out.push_str(&decimal_point);
        out.push_str(fraction);
    }
    Ok(Value::String(out))
}

fn length(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    let len = match value {
        Value::Null => 0,
        v => v.length().unwrap_or_else(|| v.render().chars().count()),
    };
    Ok(Value::from(len))
}

/// `join(separator = "")`
fn join(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let separator = arg_str(args, 0).unwrap_or_default();
    let joined = match value {
        Value::List(items) => items.iter().map(Value::render).collect::<Vec<_>>().join(&separator),
        Value::Map(m) => m.values().map(Value::render).collect::<Vec<_>>().join(&separator),
        v => v.render(),
    };
    Ok(Value::String(joined))
}

fn first(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(match value {
        Value::List(items) => items.first().cloned().unwrap_or_default(),
        Value::Map(m) => m.values().next().cloned().unwrap_or_default(),
        Value::String(s) => s.chars().next().map(|c| Value::String(c.to_string())).unwrap_or_default(),
        _ => Value::Null,
    })
}

fn last(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(match value {
        Value::List(items) => items.last().cloned().unwrap_or_default(),
        Value::Map(m) => m.values().next_back().cloned().unwrap_or_default(),
        Value::String(s) => s.chars().next_back().map(|c| Value::String(c.to_string())).unwrap_or_default(),
        _ => Value::Null,
    })
}

fn keys(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(match value {
        Value::Map(m) => Value::List(m.keys().map(|k| Value::String(k.clone())).collect()),
        Value::List(items) => Value::List((0..items.len()).map(Value::from).collect()),
        _ => Value::List(Vec::new()),
    })
}

fn values(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(match value {
        Value::Map(m) => Value::List(m.values().cloned().collect()),
        Value::List(items) => Value::List(items.clone()),
        _ => Value::List(Vec::new()),
    })
}

fn reverse(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(match value {
        Value::List(items) => Value::List(items.iter().rev().cloned().collect()),
        Value::Map(m) => Value::Map(m.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Null => Value::Null,
        v => Value::String(v.render().chars().rev().collect()),
    })
}

/// `truncate(length = 30, suffix = "...")`
fn truncate(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let s = value.render();
    let limit = usize::try_from(arg_i64(args, 0, "truncate")?.unwrap_or(30))
        .map_err(|_| CallError::new("truncate: length must not be negative"))?;
    let suffix = arg_str(args, 1).unwrap_or_else(|| "...".to_string());
    if s.chars().count() <= limit {
        return Ok(Value::String(s));
    }
    let mut out: String = s.chars().take(limit).collect();
    out.push_str(&suffix);
    Ok(Value::String(out))
}

/// `replace(search, replacement)` or `replace({search: replacement, ...})`
fn replace(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let mut s = value.render();
    match args {
        [Value::Map(pairs)] => {
            for (search, replacement) in pairs {
                if !search.is_empty() {
                    s = s.replace(search.as_str(), &replacement.render());
                }
            }
        }
        [search, replacement, ..] => {
            let search = search.render();
            if !search.is_empty() {
                s = s.replace(&search, &replacement.render());
            }
        }
        _ => return Err(CallError::new("replace: expected (search, replacement) or a map")),
    }
    Ok(Value::String(s))
}

/// `split(delimiter, limit?)`; an empty delimiter splits into characters.
fn split(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let s = value.render();
    let delimiter = arg_str(args, 0).unwrap_or_default();
    let limit = arg_i64(args, 1, "split")?.and_then(|n| usize::try_from(n).ok()).filter(|n| *n > 0);

    let parts: Vec<Value> = match (delimiter.is_empty(), limit) {
        (true, _) => s.chars().map(|c| Value::String(c.to_string())).collect(),
        (false, Some(n)) => s.splitn(n, delimiter.as_str()).map(Value::from).collect(),
        (false, None) => s.split(delimiter.as_str()).map(Value::from).collect(),
    };
    Ok(Value::List(parts))
}

/// `date(format = "%Y-%m-%d %H:%M:%S")`
///
/// Accepts Unix timestamps, `"now"`, RFC 3339 strings, and
/// `YYYY-MM-DD[ HH:MM:SS]` strings. Timestamps and naive strings are UTC.
fn date(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let format = arg_str(args, 0).unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
    let datetime = to_datetime(value)?;
    let mut out = String::new();
    write!(out, "{}", datetime.format(&format))
        .map_err(|_| CallError::new(format!("date: invalid format '{format}'")))?;
    Ok(Value::String(out))
}

fn to_datetime(value: &Value) -> Result<DateTime<FixedOffset>, CallError> {
    let from_timestamp = |secs: i64| {
        DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.fixed_offset())
            .ok_or_else(|| CallError::new(format!("date: timestamp {secs} out of range")))
    };
    match value {
        Value::Int(secs) => from_timestamp(*secs),
        Value::Float(secs) => from_timestamp(*secs as i64),
        Value::Null => Ok(Local::now().fixed_offset()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "now" {
                return Ok(Local::now().fixed_offset());
            }
            if let Ok(secs) = s.parse::<i64>() {
                return from_timestamp(secs);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt);
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(naive.and_utc().fixed_offset());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc().fixed_offset())
                .ok_or_else(|| CallError::new(format!("date: cannot parse '{s}'")))
        }
        other => Err(CallError::new(format!(
            "date: expected a timestamp or date string, got {}",
            other.type_name()
        ))),
    }
}

/// `default(fallback = "")`: substitutes for null, `""`, and empty collections.
fn default(value: &Value, args: &[Value]) -> Result<Value, CallError> {
    let empty = match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(m) => m.is_empty(),
        _ => false,
    };
    if empty {
        Ok(args.first().cloned().unwrap_or_else(|| Value::String(String::new())))
    } else {
        Ok(value.clone())
    }
}

fn json_encode(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    serde_json::to_string(&value.to_json())
        .map(Value::String)
        .map_err(|e| CallError::new(format!("json_encode: {e}")))
}

fn json_decode(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    match value {
        Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
            .map(Value::from)
            .map_err(|e| CallError::new(format!("json_decode: {e}"))),
        other => Ok(other.clone()),
    }
}

/// Strings are percent-encoded; maps become a query string.
fn url_encode(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    let encoded = match value {
        Value::Map(m) => m
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(&v.render())))
            .collect::<Vec<_>>()
            .join("&"),
        v => urlencoding::encode(&v.render()).into_owned(),
    };
    Ok(Value::String(encoded))
}

fn url_decode(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    urlencoding::decode(&value.render())
        .map(|s| Value::String(s.into_owned()))
        .map_err(|e| CallError::new(format!("url_decode: {e}")))
}

/// Pretty-printed JSON of the value, for debugging templates.
fn dump(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    serde_json::to_string_pretty(&value.to_json())
        .map(Value::String)
        .map_err(|e| CallError::new(format!("dump: {e}")))
}

fn raw(value: &Value, _args: &[Value]) -> Result<Value, CallError> {
    Ok(value.clone())
}
