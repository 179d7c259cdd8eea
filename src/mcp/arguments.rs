//! Lenient tool-argument handling.
//!
//! LLM clients often send `"true"` for a boolean, `"900"` for a number or a
//! JSON-encoded string for a list. The deserializers here accept both the
//! native and the string form, and the schema builders advertise both so that
//! schema-validating clients do not reject them up front.

use chrono::{DateTime, FixedOffset};
use serde::de::{DeserializeOwned, Error as DeError};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

/// Case-insensitive match for the strings [`coerce_bool`] accepts. JSON
/// Schema patterns have no flags, hence the character classes.
pub const BOOLEAN_STRING_PATTERN: &str =
    r"^\s*([Tt][Rr][Uu][Ee]|[Ff][Aa][Ll][Ss][Ee]|[Yy]([Ee][Ss])?|[Nn][Oo]?|[Oo][Nn]|[Oo][Ff][Ff]|1|0)\s*$";

/// Decimal number, optionally signed, surrounded by optional whitespace.
pub const NUMERIC_STRING_PATTERN: &str = r"^\s*-?\d+(\.\d+)?\s*$";

const TIMESTAMP_HINT: &str =
    "expected an RFC 3339 timestamp with a time zone offset, e.g. 2024-05-01T08:00:00-07:00";

pub fn coerce_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(true),
            Some(0) => Ok(false),
            _ => Err(format!("expected a boolean, got {n}")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            other => Err(format!("expected a boolean, got \"{other}\"")),
        },
        other => Err(format!("expected a boolean, got {other}")),
    }
}

pub fn coerce_number(value: &Value) -> Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(format!("expected a number, got {value}")),
    }
}

/// Non-negative integer. Fractional input is rounded to the nearest whole number.
pub fn coerce_integer(value: &Value) -> Result<u64, String> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_u64() {
            return Ok(i);
        }
    }
    if let Value::String(s) = value {
        if let Ok(i) = s.trim().parse::<u64>() {
            return Ok(i);
        }
    }
    let n = coerce_number(value)
        .map_err(|_| format!("expected a non-negative integer, got {value}"))?;
    if n < 0.0 || n > u64::MAX as f64 {
        return Err(format!("expected a non-negative integer, got {value}"));
    }
    Ok(n.round() as u64)
}

/// Accepts a JSON array, a JSON-encoded array string, or a comma-separated string.
pub fn coerce_list<T: DeserializeOwned>(value: &Value) -> Result<Vec<T>, String> {
    let items = match value {
        Value::Array(items) => Value::Array(items.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Array(Vec::new())
            } else if trimmed.starts_with('[') {
                serde_json::from_str::<Value>(trimmed)
                    .map_err(|e| format!("expected a JSON array, got \"{trimmed}\": {e}"))?
            } else {
                Value::Array(
                    trimmed
                        .split(',')
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(|item| {
                            serde_json::from_str::<Value>(item)
                                .unwrap_or_else(|_| Value::String(item.to_string()))
                        })
                        .collect(),
                )
            }
        }
        other => return Err(format!("expected a list, got {other}")),
    };
    serde_json::from_value(items).map_err(|e| format!("invalid list element: {e}"))
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    let trimmed = raw.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .map_err(|_| format!("{TIMESTAMP_HINT}, got \"{trimmed}\""))
}

// --- serde adapters ---

pub fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => parse_timestamp(&s).map_err(D::Error::custom),
        other => Err(D::Error::custom(format!("{TIMESTAMP_HINT}, got {other}"))),
    }
}

pub fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    optional(deserializer, coerce_bool)
}

pub fn opt_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    optional(deserializer, coerce_number)
}

pub fn opt_integer<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    optional(deserializer, coerce_integer)
}

pub fn opt_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    optional(deserializer, coerce_list::<T>)
}

fn optional<'de, D, T, F>(deserializer: D, coerce: F) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    F: Fn(&Value) -> Result<T, String>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => coerce(&value).map(Some).map_err(D::Error::custom),
    }
}

// --- schema builders ---

pub fn timestamp_schema(description: &str) -> Value {
    json!({
        "type": "string",
        "format": "date-time",
        "description": description,
    })
}

pub fn string_schema(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

pub fn boolean_schema(description: &str, default: bool) -> Value {
    json!({
        "anyOf": [
            { "type": "boolean" },
            { "type": "string", "pattern": BOOLEAN_STRING_PATTERN },
        ],
        "default": default,
        "description": description,
    })
}

pub fn number_schema(description: &str, default: Option<f64>) -> Value {
    let mut schema = json!({
        "anyOf": [
            { "type": "number" },
            { "type": "string", "pattern": NUMERIC_STRING_PATTERN },
        ],
        "description": description,
    });
    if let Some(default) = default {
        schema["default"] = json!(default);
    }
    schema
}

pub fn integer_schema(description: &str, default: Option<u64>) -> Value {
    let mut schema = json!({
        "anyOf": [
            { "type": "integer", "minimum": 0 },
            { "type": "string", "pattern": NUMERIC_STRING_PATTERN },
        ],
        "description": description,
    });
    if let Some(default) = default {
        schema["default"] = json!(default);
    }
    schema
}

/// `item_type` is the JSON schema type of the list elements.
pub fn list_schema(item_type: &str, description: &str) -> Value {
    json!({
        "anyOf": [
            { "type": "array", "items": { "type": item_type } },
            { "type": "string" },
        ],
        "description": description,
    })
}
