//! Column type vocabulary shared by every backend family.
//!
//! Declared types are plain strings so that live structures introspected from
//! any backend compare directly against the canonical schema.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// UTF-8 text.
pub const STRING: &str = "string";
/// 64-bit signed integer.
pub const INTEGER: &str = "integer";
/// Floating point or decimal number.
pub const NUMBER: &str = "number";
/// Boolean flag.
pub const BOOLEAN: &str = "boolean";
/// RFC 3339 timestamp.
pub const TIMESTAMP: &str = "timestamp";
/// Arbitrary JSON (objects, arrays).
pub const JSON: &str = "json";

/// All known column types.
pub const KNOWN_TYPES: [&str; 6] = [STRING, INTEGER, NUMBER, BOOLEAN, TIMESTAMP, JSON];

/// Check whether a type string belongs to the vocabulary.
pub fn is_known_type(data_type: &str) -> bool {
    KNOWN_TYPES.contains(&data_type)
}

/// Infer the column type of a stored value.
///
/// Returns `None` for nulls, which carry no type information.
pub fn infer_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(BOOLEAN),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(INTEGER),
        Value::Number(_) => Some(NUMBER),
        Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => Some(TIMESTAMP),
        Value::String(_) => Some(STRING),
        Value::Array(_) | Value::Object(_) => Some(JSON),
    }
}

/// Convert a value to the given column type.
///
/// Nulls are preserved. Returns a human readable reason when the value
/// cannot be represented in the target type.
pub fn coerce_value(value: &Value, data_type: &str) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match data_type {
        STRING => Ok(match value {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }),
        INTEGER => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(format!("{} has a fractional part", n)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{}' is not an integer", s)),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            other => Err(format!("{} is not an integer", other)),
        },
        NUMBER => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not a number", s)),
            other => Err(format!("{} is not a number", other)),
        },
        BOOLEAN => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("{} is not a boolean", n)),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            other => Err(format!("{} is not a boolean", other)),
        },
        TIMESTAMP => match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::String(dt.with_timezone(&Utc).to_rfc3339()))
                .map_err(|_| format!("'{}' is not an RFC 3339 timestamp", s)),
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(|dt| Value::String(dt.to_rfc3339()))
                .ok_or_else(|| format!("{} is not a unix timestamp", n)),
            other => Err(format!("{} is not a timestamp", other)),
        },
        JSON => Ok(value.clone()),
        other => Err(format!("unknown column type '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type(&json!(null)), None);
        assert_eq!(infer_type(&json!(true)), Some(BOOLEAN));
        assert_eq!(infer_type(&json!(42)), Some(INTEGER));
        assert_eq!(infer_type(&json!(4.2)), Some(NUMBER));
        assert_eq!(infer_type(&json!("hello")), Some(STRING));
        assert_eq!(infer_type(&json!("2024-01-01T00:00:00Z")), Some(TIMESTAMP));
        assert_eq!(infer_type(&json!({"a": 1})), Some(JSON));
    }

    #[test]
    fn test_coerce_to_number() {
        assert_eq!(coerce_value(&json!("12.5"), NUMBER).unwrap(), json!(12.5));
        assert!(coerce_value(&json!("call us"), NUMBER).is_err());
    }

    #[test]
    fn test_coerce_to_integer() {
        assert_eq!(coerce_value(&json!("7"), INTEGER).unwrap(), json!(7));
        assert_eq!(coerce_value(&json!(3.0), INTEGER).unwrap(), json!(3));
        assert!(coerce_value(&json!(3.5), INTEGER).is_err());
    }

    #[test]
    fn test_coerce_preserves_null() {
        assert_eq!(coerce_value(&json!(null), BOOLEAN).unwrap(), json!(null));
    }

    #[test]
    fn test_coerce_boolean_and_string() {
        assert_eq!(coerce_value(&json!("yes"), BOOLEAN).unwrap(), json!(true));
        assert_eq!(coerce_value(&json!(15), STRING).unwrap(), json!("15"));
    }

    #[test]
    fn test_coerce_timestamp() {
        let value = coerce_value(&json!(0), TIMESTAMP).unwrap();
        assert_eq!(value, json!("1970-01-01T00:00:00+00:00"));
        assert!(coerce_value(&json!("yesterday"), TIMESTAMP).is_err());
    }
}
