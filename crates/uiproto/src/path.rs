//! Canonical path-string parsing.
//!
//! Path strings are dot-separated segments: `N` for a 1-based array
//! index, `..` for parent, `name()` / `name(_)` for method calls, an
//! optional leading `@NAME` for standard-variable entry, and an optional
//! trailing `?k=v&k2=v2` query suffix carrying additional properties.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A plain field access, or a decimal literal used as a 1-based array index.
    Field(String),
    /// `..` — ascend to the parent in the variable tree (not the raw value graph).
    Parent,
    /// `name()` (read-style) or `name(_)` (write-style, receives the write value).
    Method { name: String, with_arg: bool },
    /// A leading `@NAME` segment, consulting the standard-variable registry.
    StandardVar(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    #[error("empty path segment")]
    EmptySegment,
    #[error("unterminated method call: {0}")]
    UnterminatedMethod(String),
    #[error("malformed query suffix: {0}")]
    MalformedQuery(String),
}

/// A parsed path: its segments plus any trailing `?k=v` properties.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPath {
    pub segments: Vec<PathSegment>,
    pub query: BTreeMap<String, String>,
}

/// Parses a canonical path string into its segments and query suffix.
pub fn parse_path(path: &str) -> Result<ParsedPath, PathParseError> {
    let (body, query_str) = match path.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (path, None),
    };

    let tokens: Vec<&str> = body.split('.').collect();
    let last_idx = tokens.len() - 1;
    let mut segments = Vec::new();
    for (idx, raw) in tokens.into_iter().enumerate() {
        if raw.is_empty() {
            // Two adjacent dots ("..") produce an empty token between them,
            // which is the canonical spelling of a parent-ascension segment.
            // A leading or trailing empty token is a dangling dot instead.
            if idx == 0 || idx == last_idx {
                return Err(PathParseError::EmptySegment);
            }
            segments.push(PathSegment::Parent);
            continue;
        }
        if idx == 0 {
            if let Some(name) = raw.strip_prefix('@') {
                segments.push(PathSegment::StandardVar(name.to_owned()));
                continue;
            }
        }
        segments.push(parse_segment(raw)?);
    }

    let query = match query_str {
        Some(q) if !q.is_empty() => parse_query(q)?,
        _ => BTreeMap::new(),
    };

    Ok(ParsedPath { segments, query })
}

fn parse_segment(raw: &str) -> Result<PathSegment, PathParseError> {
    if let Some(inner) = raw.strip_suffix(')') {
        let Some(open) = inner.find('(') else {
            return Err(PathParseError::UnterminatedMethod(raw.to_owned()));
        };
        let name = inner[..open].to_owned();
        let arg = &inner[open + 1..];
        let with_arg = match arg {
            "" => false,
            "_" => true,
            _ => return Err(PathParseError::UnterminatedMethod(raw.to_owned())),
        };
        if name.is_empty() {
            return Err(PathParseError::EmptySegment);
        }
        return Ok(PathSegment::Method { name, with_arg });
    }
    if raw.contains('(') {
        return Err(PathParseError::UnterminatedMethod(raw.to_owned()));
    }
    Ok(PathSegment::Field(raw.to_owned()))
}

fn parse_query(q: &str) -> Result<BTreeMap<String, String>, PathParseError> {
    let mut out = BTreeMap::new();
    for pair in q.split('&') {
        let Some((k, v)) = pair.split_once('=') else {
            return Err(PathParseError::MalformedQuery(pair.to_owned()));
        };
        if k.is_empty() {
            return Err(PathParseError::MalformedQuery(pair.to_owned()));
        }
        out.insert(k.to_owned(), v.to_owned());
    }
    Ok(out)
}
