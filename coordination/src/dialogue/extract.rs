//! Balanced-brace JSON extraction from free-form model replies.

use serde_json::{Map, Value};

/// Every balanced `{...}` substring of `text`, outermost first, in order of
/// their opening brace.
///
/// Braces inside JSON string literals are ignored, so `{"a": "}"}` is one
/// candidate. Nested objects are reported after the object that contains
/// them, letting callers fall back to an inner object when the outer one is
/// not valid JSON.
pub fn brace_candidates(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut candidates = Vec::new();

    for (start, &b) in bytes.iter().enumerate() {
        if b != b'{' {
            continue;
        }
        if let Some(end) = matching_close(bytes, start) {
            candidates.push(&text[start..=end]);
        }
    }
    candidates
}

/// Index of the `}` closing the `{` at `start`, if the braces balance.
fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// The first candidate that parses as a JSON object.
pub fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    brace_candidates(text)
        .into_iter()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Parse the whole reply as a JSON object.
pub fn whole_json_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Extraction first, then the whole reply.
pub fn find_json_object(text: &str) -> Option<Map<String, Value>> {
    first_json_object(text).or_else(|| whole_json_object(text))
}
