//! Decoding model responses into JSON records.
//!
//! Models wrap payloads in ```json fences or surround them with prose; the
//! payload is located and decoded before anything else looks at it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{Error, Result};

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

const PREVIEW_CHARS: usize = 200;

/// Content of the first fenced block, or the trimmed input.
pub fn strip_fences(raw: &str) -> &str {
    FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| raw.trim())
}

/// Decodes the JSON payload of a model response.
pub fn extract_json(raw: &str) -> Result<Value> {
    let body = strip_fences(raw);
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    let mut starts: Vec<usize> = ['[', '{'].iter().filter_map(|c| body.find(*c)).collect();
    starts.sort_unstable();
    for start in starts {
        if let Some(end) = balanced_end(body, start) {
            if let Ok(value) = serde_json::from_str::<Value>(&body[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(Error::Parse(format!(
        "no JSON payload in model response: {}",
        preview(raw)
    )))
}

/// Records of a response: a bare array, an object holding the array under
/// `key`, or a single object.
pub fn parse_records(raw: &str, key: &str) -> Result<Vec<Map<String, Value>>> {
    let items = match extract_json(raw)? {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove(key) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::Parse(format!(
                    "expected '{}' to be an array, got {}",
                    key,
                    kind(&other)
                )))
            }
            None if obj.is_empty() => Vec::new(),
            None => vec![Value::Object(obj)],
        },
        Value::Null => Vec::new(),
        other => {
            return Err(Error::Parse(format!(
                "expected a JSON array of {}, got {}",
                key,
                kind(&other)
            )))
        }
    };

    let total = items.len();
    let records: Vec<Map<String, Value>> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    if records.len() < total {
        debug!("Skipped {} non-object {} items", total - records.len(), key);
    }
    Ok(records)
}

/// Byte index of the bracket closing the one at `start`, skipping strings.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", cut)
}
