//! Property paths for bindings
//!
//! Supports:
//! - a.b.c (dot notation)
//! - a[0].b and a.0.b (array index)
//! - $.a.b (optional root prefix)
//!
//! A path that walks off the value yields `None`; only malformed paths are
//! errors.

use serde_json::Value;

use crate::error::AigneError;

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object field access: .field
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

/// Parse a property path into segments
///
/// Examples:
/// - "answer.confidence" → [Field("answer"), Field("confidence")]
/// - "docs[0].content" → [Field("docs"), Index(0), Field("content")]
/// - "$text" → [Field("$text")]
pub fn parse(path: &str) -> Result<Vec<Segment>, AigneError> {
    let path = match path.strip_prefix("$.") {
        Some(rest) => rest,
        None if path == "$" => return Ok(vec![]),
        None => path,
    };

    if path.is_empty() {
        return Ok(vec![]);
    }

    let invalid = |reason: &str| AigneError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            return Err(invalid("empty segment"));
        }

        if let Some(bracket_pos) = part.find('[') {
            let field = &part[..bracket_pos];
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }

            // Allow chained indexes: matrix[0][1]
            let mut rest = &part[bracket_pos..];
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| invalid("unclosed '['"))?;
                if !rest.starts_with('[') {
                    return Err(invalid("unexpected text after ']'"));
                }
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        } else if let Ok(index) = part.parse::<usize>() {
            segments.push(Segment::Index(index));
        } else {
            segments.push(Segment::Field(part.to_string()));
        }
    }

    Ok(segments)
}

/// Walk `segments` into `value`
pub fn apply<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        Segment::Field(name) => current.get(name),
        // Numeric segments also address object keys like "0"
        Segment::Index(idx) => match current {
            Value::Array(items) => items.get(*idx),
            Value::Object(map) => map.get(&idx.to_string()),
            _ => None,
        },
    })
}

/// Parse and apply in one step
pub fn resolve(value: &Value, path: &str) -> Result<Option<Value>, AigneError> {
    let segments = parse(path)?;
    Ok(apply(value, &segments).cloned())
}
