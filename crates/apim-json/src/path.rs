//! Path expressions addressing locations inside a JSON document.
//!
//! Two notations are accepted:
//! - JSON Pointer: `""` (root), `/a/0/b~1c`
//! - a JSONPath subset: `$`, `$.a.b`, `$['a']`, `$["a"]`, `$.a[0]`, `$.a[*]`, `$.*`
//!
//! Recursive descent (`..`), filters and slices are not supported.

use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path '{path}': {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

/// One step of a parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object member; on an array, a numeric key addresses an element.
    Key(String),
    /// Array element from bracket notation.
    Index(usize),
    /// Past-the-end array position (`-` in a pointer). Only meaningful as the
    /// last segment of an insertion.
    Append,
    /// Every member or element.
    Wildcard,
}

/// One step of a concrete location in a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Key(String),
    Index(usize),
}

pub type Location = Vec<Step>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl JsonPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        let segments = if trimmed.is_empty() || trimmed.starts_with('/') {
            parse_pointer(trimmed)
        } else if trimmed.starts_with('$') {
            parse_dotted(trimmed).map_err(|reason| PathError {
                path: raw.to_string(),
                reason,
            })?
        } else {
            return Err(PathError {
                path: raw.to_string(),
                reason: "expected a JSON pointer ('/...') or a JSONPath ('$...')".into(),
            });
        };
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// `true` when the expression can match at most one location.
    pub fn is_definite(&self) -> bool {
        !self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }

    /// Split into the parent expression and the final segment; `None` at root.
    pub fn split_last(&self) -> Option<(JsonPath, &Segment)> {
        let (last, parent) = self.segments.split_last()?;
        let parent = JsonPath {
            raw: format!("{} (parent)", self.raw),
            segments: parent.to_vec(),
        };
        Some((parent, last))
    }

    /// Concrete locations of every value matched in `document`, in document
    /// order.
    pub fn select(&self, document: &Value) -> Vec<Location> {
        let mut current: Vec<(Location, &Value)> = vec![(Vec::new(), document)];
        for segment in &self.segments {
            let mut next = Vec::new();
            for (location, value) in current {
                match (segment, value) {
                    (Segment::Key(key), Value::Object(map)) => {
                        if let Some(child) = map.get(key) {
                            next.push((child_location(&location, Step::Key(key.clone())), child));
                        }
                    }
                    (Segment::Key(key), Value::Array(items)) => {
                        if let Some((idx, child)) = parse_index(key)
                            .and_then(|idx| items.get(idx).map(|child| (idx, child)))
                        {
                            next.push((child_location(&location, Step::Index(idx)), child));
                        }
                    }
                    (Segment::Index(idx), Value::Array(items)) => {
                        if let Some(child) = items.get(*idx) {
                            next.push((child_location(&location, Step::Index(*idx)), child));
                        }
                    }
                    (Segment::Wildcard, Value::Object(map)) => {
                        for (key, child) in map {
                            next.push((child_location(&location, Step::Key(key.clone())), child));
                        }
                    }
                    (Segment::Wildcard, Value::Array(items)) => {
                        for (idx, child) in items.iter().enumerate() {
                            next.push((child_location(&location, Step::Index(idx)), child));
                        }
                    }
                    _ => {}
                }
            }
            current = next;
        }
        current.into_iter().map(|(location, _)| location).collect()
    }
}

pub fn get<'a>(document: &'a Value, location: &[Step]) -> Option<&'a Value> {
    location.iter().try_fold(document, |value, step| match (step, value) {
        (Step::Key(key), Value::Object(map)) => map.get(key),
        (Step::Index(idx), Value::Array(items)) => items.get(*idx),
        _ => None,
    })
}

pub fn get_mut<'a>(document: &'a mut Value, location: &[Step]) -> Option<&'a mut Value> {
    location.iter().try_fold(document, |value, step| match (step, value) {
        (Step::Key(key), Value::Object(map)) => map.get_mut(key),
        (Step::Index(idx), Value::Array(items)) => items.get_mut(*idx),
        _ => None,
    })
}

pub(crate) fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn child_location(parent: &[Step], step: Step) -> Location {
    let mut location = Vec::with_capacity(parent.len() + 1);
    location.extend_from_slice(parent);
    location.push(step);
    location
}

fn parse_pointer(raw: &str) -> Vec<Segment> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('/')
        .skip(1)
        .map(|token| {
            let token = token.replace("~1", "/").replace("~0", "~");
            if token == "-" {
                Segment::Append
            } else {
                Segment::Key(token)
            }
        })
        .collect()
}

fn parse_dotted(raw: &str) -> Result<Vec<Segment>, String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut segments = Vec::new();
    let mut pos = 1;

    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                match chars.get(pos) {
                    Some('.') => return Err("recursive descent is not supported".into()),
                    Some('*') => {
                        segments.push(Segment::Wildcard);
                        pos += 1;
                    }
                    Some(_) => {
                        let start = pos;
                        while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                            pos += 1;
                        }
                        let name: String = chars[start..pos].iter().collect();
                        segments.push(Segment::Key(name));
                    }
                    None => return Err("path ends with '.'".into()),
                }
            }
            '[' => {
                pos += 1;
                let close = chars[pos..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|offset| pos + offset)
                    .ok_or_else(|| "unclosed '['".to_string())?;
                let inner: String = chars[pos..close].iter().collect();
                let inner = inner.trim();
                segments.push(parse_bracket(inner)?);
                pos = close + 1;
            }
            other => return Err(format!("unexpected character '{other}' at {pos}")),
        }
    }
    Ok(segments)
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(name) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(Segment::Key(name.to_string()));
        }
    }
    parse_index(inner)
        .map(Segment::Index)
        .ok_or_else(|| format!("unsupported bracket expression '[{inner}]'"))
}
