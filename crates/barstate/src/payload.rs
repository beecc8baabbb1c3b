//! Helpers around the loosely typed payloads modules publish.
//!
//! A payload is any [`serde_json::Value`]. By convention it is an object carrying a `text` field,
//! optionally `icon`, `class`, `detail`, and the bookkeeping fields `stale` and `timestamp` managed here.
//! `Value::Null` means "the module wants to show nothing".

use serde_json::{Map, Value};

pub const TEXT_FIELD: &str = "text";
pub const STALE_FIELD: &str = "stale";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Current time as fractional unix seconds.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Whether a fetch result counts as "no data". Null, `false`, and empty strings, arrays or objects are empty.
/// Numbers are never empty, a reading of `0` is still a reading.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// Wrap a bare value in an object as its `text` field. Objects are returned unchanged.
pub fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(TEXT_FIELD.to_string(), other);
            map
        }
    }
}

/// Remove any staleness marker from a freshly fetched payload and stamp it with the fetch time.
/// Non-object payloads are passed through untouched.
pub fn mark_fresh(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.remove(STALE_FIELD);
            map.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_timestamp()));
            Value::Object(map)
        }
        other => other,
    }
}

/// Turn a last-known-good payload into its stale form: `stale: true` and a current `timestamp`.
pub fn mark_stale(value: Value) -> Value {
    let mut map = into_object(value);
    map.insert(STALE_FIELD.to_string(), Value::Bool(true));
    map.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_timestamp()));
    Value::Object(map)
}

pub fn is_stale(value: &Value) -> bool {
    value.get(STALE_FIELD).and_then(Value::as_bool).unwrap_or(false)
}

/// Interpret a line or block of program output. JSON objects are taken as-is,
/// anything else becomes `{"text": <output>}`. Blank output yields `Value::Null`.
pub fn from_output(output: &str) -> Value {
    let output = output.trim_matches('\n');
    if output.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str::<Value>(output) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(into_object(Value::String(output.to_string()))),
    }
}
