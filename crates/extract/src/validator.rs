use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::schema::ShapeTag;

/// Classification of raw model output against the requested shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutcome {
    /// Decoded, and the top-level shape matches.
    Success(Value),
    /// Decoded, but the top-level shape is wrong. Never repaired.
    ShapeMismatch(Value),
    /// Not decodable as JSON at all.
    ParseFailure { raw: String, error: String },
}

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\z").expect("valid regex")
});

/// Strip surrounding whitespace and one enclosing markdown code fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match CODE_FENCE_RE.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

pub fn validate(raw: &str, shape: ShapeTag) -> ParsedOutcome {
    let candidate = strip_code_fence(raw);

    if candidate.is_empty() {
        return ParsedOutcome::ParseFailure {
            raw: raw.to_string(),
            error: "model output is empty".to_string(),
        };
    }

    let value: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(e) => {
            return ParsedOutcome::ParseFailure {
                raw: raw.to_string(),
                error: e.to_string(),
            };
        }
    };

    if matches_shape(&value, shape) {
        ParsedOutcome::Success(value)
    } else {
        ParsedOutcome::ShapeMismatch(value)
    }
}

fn matches_shape(value: &Value, shape: ShapeTag) -> bool {
    match (shape, value) {
        (ShapeTag::Object, Value::Object(_)) => true,
        (ShapeTag::Array, Value::Array(items)) => items.iter().all(Value::is_object),
        _ => false,
    }
}

/// Short description of a decoded value's top-level shape, for diagnostics.
pub fn describe_shape(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(items) if items.iter().all(Value::is_object) => "array",
        Value::Array(_) => "array with non-object elements",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}
