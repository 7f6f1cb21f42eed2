//! Defensive field access over untyped provider payloads.
//!
//! Provider responses are loosely structured and change shape between SDK versions, so
//! nothing in this module assumes a field exists or has a given type. Paths are dot
//! separated; a segment addresses an object key, or an array index when it parses as an
//! integer and the current value is an array (`candidates.0.finishReason`).
//!
//! Every accessor degrades to a default instead of failing.

use serde_json::{Map, Value};

/// Walk `path` through `value`.
///
/// Returns `None` when a segment is missing, when an intermediate value is not an object or
/// array, or when the addressed value is `null`.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    if current.is_null() { None } else { Some(current) }
}

/// Like [`get`], falling back to `default`.
pub fn get_or<'a>(value: &'a Value, path: &str, default: &'a Value) -> &'a Value {
    get(value, path).unwrap_or(default)
}

/// String at `path`, or `""`.
pub fn string(value: &Value, path: &str) -> String {
    get(value, path).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Number at `path`, or `0.0`. Numeric strings are not coerced.
pub fn number(value: &Value, path: &str) -> f64 {
    get(value, path).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Non-negative integer at `path`, or `0`.
///
/// Token counts arrive as JSON numbers; negative or non-finite values read as zero and
/// fractional values are truncated.
pub fn count(value: &Value, path: &str) -> u64 {
    match get(value, path) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Boolean at `path`, or `false`.
pub fn boolean(value: &Value, path: &str) -> bool {
    get(value, path).and_then(Value::as_bool).unwrap_or(false)
}

/// Object at `path`, or an empty map.
pub fn object(value: &Value, path: &str) -> Map<String, Value> {
    get(value, path).and_then(Value::as_object).cloned().unwrap_or_default()
}

/// Array at `path`, or an empty vector.
pub fn array(value: &Value, path: &str) -> Vec<Value> {
    get(value, path).and_then(Value::as_array).cloned().unwrap_or_default()
}
