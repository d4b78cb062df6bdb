/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template tag scanner.
//!
//! Splits template source into literal text and tag segments:
//!
//! - `{{ expr }}`: escaped interpolation
//! - `{! expr !}`: raw interpolation
//! - `{% stmt %}`: statement
//! - `{# ... #}`: comment (dropped here, so nothing downstream sees it)
//!
//! Closing delimiters inside quoted strings do not end a tag. A statement or
//! comment that is alone on its line consumes that line's indentation and
//! trailing newline, so block-structured templates don't leave blank lines.

use crate::ast::SourceLocation;
use crate::error::{TemplateError, TemplateResult};

/// A scanned piece of template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Output {
        source: String,
        escape: bool,
        location: SourceLocation,
    },
    Statement {
        source: String,
        location: SourceLocation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Escaped,
    Raw,
    Statement,
    Comment,
}

impl TagKind {
    fn from_opener(c: u8) -> Option<Self> {
        match c {
            b'{' => Some(TagKind::Escaped),
            b'!' => Some(TagKind::Raw),
            b'%' => Some(TagKind::Statement),
            b'#' => Some(TagKind::Comment),
            _ => None,
        }
    }

    fn closer(self) -> &'static str {
        match self {
            TagKind::Escaped => "}}",
            TagKind::Raw => "!}",
            TagKind::Statement => "%}",
            TagKind::Comment => "#}",
        }
    }

    fn opener(self) -> &'static str {
        match self {
            TagKind::Escaped => "{{",
            TagKind::Raw => "{!",
            TagKind::Statement => "{%",
            TagKind::Comment => "{#",
        }
    }

    /// Statements and comments produce no output of their own.
    fn is_silent(self) -> bool {
        matches!(self, TagKind::Statement | TagKind::Comment)
    }
}

/// Maps byte offsets to line/column positions.
pub(crate) struct LineIndex<'a> {
    source: &'a str,
    file: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub(crate) fn new(source: &'a str, file: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            source,
            file,
            line_starts,
        }
    }

    pub(crate) fn location(&self, offset: usize) -> SourceLocation {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let column = self.source[line_start..offset].chars().count() + 1;
        SourceLocation::new(self.file, line + 1, column)
    }
}

/// Scan template source into segments.
///
/// # Arguments
/// * `source` - The template source text
/// * `file` - File name used in locations and error messages
pub fn scan(source: &str, file: &str) -> TemplateResult<Vec<Segment>> {
    let index = LineIndex::new(source, file);
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while let Some(rel) = source[pos..].find('{') {
        let start = pos + rel;
        let Some(kind) = bytes.get(start + 1).copied().and_then(TagKind::from_opener) else {
            pos = start + 1;
            continue;
        };

        let inner_start = start + 2;
        let inner_end = find_closer(source, inner_start, kind).ok_or_else(|| {
            TemplateError::parse(
                format!("Unclosed '{}' tag", kind.opener()),
                &index.location(start),
            )
        })?;
        let mut tag_end = inner_end + kind.closer().len();
        let mut text_end = start;

        if kind.is_silent() {
            if let Some((line_start, line_end)) = standalone_line(source, text_start, start, tag_end) {
                text_end = line_start;
                tag_end = line_end;
            }
        }

        if text_end > text_start {
            segments.push(Segment::Text(source[text_start..text_end].to_string()));
        }

        let inner = source[inner_start..inner_end].trim().to_string();
        let location = index.location(start);
        match kind {
            TagKind::Escaped | TagKind::Raw => segments.push(Segment::Output {
                source: inner,
                escape: kind == TagKind::Escaped,
                location,
            }),
            TagKind::Statement => segments.push(Segment::Statement {
                source: inner,
                location,
            }),
            TagKind::Comment => {}
        }

        pos = tag_end;
        text_start = tag_end;
    }

    if text_start < source.len() {
        segments.push(Segment::Text(source[text_start..].to_string()));
    }

    Ok(segments)
}

/// Find the byte offset of the closing delimiter, skipping quoted strings.
fn find_closer(source: &str, from: usize, kind: TagKind) -> Option<usize> {
    let closer = kind.closer();
    if kind == TagKind::Comment {
        return source[from..].find(closer).map(|i| from + i);
    }

    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in source[from..].char_indices() {
        let at = from + i;
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if source[at..].starts_with(closer) {
                    return Some(at);
                }
            }
        }
    }
    None
}

/// If the tag spanning `start..end` is the only content on its line, return
/// the byte range to swallow: from the line start to just past the newline.
fn standalone_line(source: &str, text_start: usize, start: usize, end: usize) -> Option<(usize, usize)> {
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    if line_start < text_start || !source[line_start..start].trim().is_empty() {
        return None;
    }

    let rest = &source[end..];
    let (trailing, line_end) = match rest.find('\n') {
        Some(nl) => (&rest[..nl], end + nl + 1),
        None => (rest, source.len()),
    };
    if !trailing.trim().is_empty() {
        return None;
    }
    Some((line_start, line_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn output(source: &str, escape: bool, line: usize, column: usize) -> Segment {
        Segment::Output {
            source: source.to_string(),
            escape,
            location: SourceLocation::new("t", line, column),
        }
    }

    fn statement(source: &str, line: usize, column: usize) -> Segment {
        Segment::Statement {
            source: source.to_string(),
            location: SourceLocation::new("t", line, column),
        }
    }

    #[test]
    fn test_text_only() {
        assert_eq!(
            scan("Hello, world!", "t").unwrap(),
            vec![Segment::Text("Hello, world!".to_string())]
        );
    }

    #[test]
    fn test_tag_kinds() {
        let segments = scan("a{{ x }}b{! y !}c{% if z %}d{# note #}e", "t").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("a".to_string()),
                output("x", true, 1, 2),
                Segment::Text("b".to_string()),
                output("y", false, 1, 10),
                Segment::Text("c".to_string()),
                statement("if z", 1, 18),
                Segment::Text("d".to_string()),
                Segment::Text("e".to_string()),
            ]
        );
    }

    #[test]
    fn test_closer_inside_string_literal() {
        let segments = scan(r#"{{ "a }} b"|upper }}"#, "t").unwrap();
        assert_eq!(segments, vec![output(r#""a }} b"|upper"#, true, 1, 1)]);
    }

    #[test]
    fn test_lone_brace_is_text() {
        let segments = scan("fn() { return 1; }", "t").unwrap();
        assert_eq!(segments, vec![Segment::Text("fn() { return 1; }".to_string())]);
    }

    #[test]
    fn test_unclosed_tag_reports_location() {
        let err = scan("line one\n  {{ name", "page.html").unwrap_err();
        match err {
            TemplateError::ParseError { message, location } => {
                assert_eq!(message, "Unclosed '{{' tag");
                assert_eq!(location, SourceLocation::new("page.html", 2, 3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_standalone_statement_consumes_line() {
        let segments = scan("before\n  {% if x %}\ncontent\n{% endif %}\nafter", "t").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("before\n".to_string()),
                statement("if x", 2, 3),
                Segment::Text("content\n".to_string()),
                statement("endif", 4, 1),
                Segment::Text("after".to_string()),
            ]
        );
    }

    #[test]
    fn test_inline_statement_keeps_whitespace() {
        let segments = scan("a {% if x %}b{% endif %} c\n", "t").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("a ".to_string()),
                statement("if x", 1, 3),
                Segment::Text("b".to_string()),
                statement("endif", 1, 14),
                Segment::Text(" c\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_standalone_comment_removed_entirely() {
        let segments = scan("a\n{# comment\nspanning lines #}\nb", "t").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("a\n".to_string()),
                Segment::Text("b".to_string()),
            ]
        );
    }
}
