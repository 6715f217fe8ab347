//! Opaque per-connection driver configuration.

use super::{DriverError, DriverResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Key/value bag handed to a driver at construction time.
pub type ConnectionConfig = BTreeMap<String, Value>;

/// Typed accessors with field-specific failures.
pub trait ConfigExt {
    /// A required string value.
    fn required_str(&self, field: &str) -> DriverResult<&str>;

    /// An optional string value.
    fn optional_str(&self, field: &str) -> DriverResult<Option<&str>>;

    /// An optional boolean, `false` when absent.
    fn flag(&self, field: &str) -> DriverResult<bool>;

    /// An optional unsigned integer.
    fn optional_u64(&self, field: &str) -> DriverResult<Option<u64>>;

    /// A required path.
    fn required_path(&self, field: &str) -> DriverResult<PathBuf> {
        self.required_str(field).map(PathBuf::from)
    }
}

impl ConfigExt for ConnectionConfig {
    fn required_str(&self, field: &str) -> DriverResult<&str> {
        match self.get(field) {
            None | Some(Value::Null) => Err(DriverError::missing(field)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(DriverError::invalid(field, "must not be empty"))
            }
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(DriverError::invalid(
                field,
                format!("expected a string, got {}", other),
            )),
        }
    }

    fn optional_str(&self, field: &str) -> DriverResult<Option<&str>> {
        match self.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.required_str(field).map(Some),
        }
    }

    fn flag(&self, field: &str) -> DriverResult<bool> {
        match self.get(field) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => s
                .parse::<bool>()
                .map_err(|_| DriverError::invalid(field, "expected true or false")),
            Some(other) => Err(DriverError::invalid(
                field,
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    fn optional_u64(&self, field: &str) -> DriverResult<Option<u64>> {
        match self.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| DriverError::invalid(field, "expected a non-negative integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| DriverError::invalid(field, "expected a non-negative integer")),
            Some(other) => Err(DriverError::invalid(
                field,
                format!("expected an integer, got {}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> ConnectionConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_required_str() {
        let cfg = config(json!({"url": "http://localhost", "blank": " ", "port": 5}));
        assert_eq!(cfg.required_str("url").unwrap(), "http://localhost");
        assert!(matches!(
            cfg.required_str("missing"),
            Err(DriverError::MissingConfig { .. })
        ));
        assert!(matches!(
            cfg.required_str("blank"),
            Err(DriverError::InvalidConfig { .. })
        ));
        assert!(matches!(
            cfg.required_str("port"),
            Err(DriverError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_flag_and_numbers() {
        let cfg = config(json!({"temporary": true, "legacy": "false", "timeoutSecs": "15"}));
        assert!(cfg.flag("temporary").unwrap());
        assert!(!cfg.flag("legacy").unwrap());
        assert!(!cfg.flag("absent").unwrap());
        assert_eq!(cfg.optional_u64("timeoutSecs").unwrap(), Some(15));
        assert_eq!(cfg.optional_u64("absent").unwrap(), None);
    }
}
