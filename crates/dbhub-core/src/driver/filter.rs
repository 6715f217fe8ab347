//! Query filters shared by all drivers.
//!
//! A filter map is a set of `field -> value` conditions. Reserved keys control
//! ordering (`_orderBy`), limiting (`_limit`) and pagination (`_offset`).
//! String values containing `*` or `%` are wildcard patterns; every other
//! value matches by equality.

use super::{DriverError, DriverResult, Record};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// Reserved key for ordering: `"field"`, `"field:desc"` or `"-field"`.
pub const ORDER_BY_KEY: &str = "_orderBy";
/// Reserved key for the maximum number of records returned.
pub const LIMIT_KEY: &str = "_limit";
/// Reserved key for the number of records skipped.
pub const OFFSET_KEY: &str = "_offset";

/// How a single field is matched.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact equality.
    Equals(Value),
    /// Case-insensitive wildcard pattern.
    Pattern {
        /// Pattern as given by the caller.
        raw: String,
        /// Compiled form.
        regex: Regex,
    },
}

impl Matcher {
    fn pattern(raw: &str) -> DriverResult<Self> {
        let body = raw
            .split(['*', '%'])
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("(?is)^{}$", body)).map_err(|e| {
            DriverError::InvalidFilter {
                key: raw.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Matcher::Pattern {
            raw: raw.to_string(),
            regex,
        })
    }

    /// Check a record value against this matcher.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let value = value.unwrap_or(&Value::Null);
        match self {
            Matcher::Equals(expected) => values_equal(expected, value),
            Matcher::Pattern { regex, .. } => match value {
                Value::String(s) => regex.is_match(s),
                Value::Number(n) => regex.is_match(&n.to_string()),
                _ => false,
            },
        }
    }
}

/// Ordering specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field to order by.
    pub field: String,
    /// Descending order.
    pub descending: bool,
}

impl OrderBy {
    fn parse(spec: &str) -> Self {
        if let Some(field) = spec.strip_prefix('-') {
            return Self {
                field: field.to_string(),
                descending: true,
            };
        }
        match spec.split_once(':') {
            Some((field, dir)) => Self {
                field: field.to_string(),
                descending: dir.eq_ignore_ascii_case("desc"),
            },
            None => Self {
                field: spec.to_string(),
                descending: false,
            },
        }
    }
}

/// Parsed query filters.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    conditions: Vec<(String, Matcher)>,
    /// Ordering, if any.
    pub order_by: Option<OrderBy>,
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Number of records to skip.
    pub offset: Option<usize>,
}

impl Filters {
    /// Filters matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain page of records.
    pub fn page(limit: usize, offset: usize) -> Self {
        Self::new().limit(limit).offset(offset)
    }

    /// Parse a filter map with reserved keys.
    pub fn from_map(map: &Record) -> DriverResult<Self> {
        let mut filters = Self::new();
        for (key, value) in map {
            match key.as_str() {
                ORDER_BY_KEY => {
                    let spec = value.as_str().ok_or_else(|| DriverError::InvalidFilter {
                        key: key.clone(),
                        reason: "expected a field name".to_string(),
                    })?;
                    filters.order_by = Some(OrderBy::parse(spec));
                }
                LIMIT_KEY => filters.limit = Some(parse_count(key, value)?),
                OFFSET_KEY => filters.offset = Some(parse_count(key, value)?),
                _ => match value {
                    Value::String(s) if s.contains('*') || s.contains('%') => {
                        filters.conditions.push((key.clone(), Matcher::pattern(s)?));
                    }
                    other => filters
                        .conditions
                        .push((key.clone(), Matcher::Equals(other.clone()))),
                },
            }
        }
        Ok(filters)
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((field.into(), Matcher::Equals(value.into())));
        self
    }

    /// Add a wildcard condition.
    pub fn like(mut self, field: impl Into<String>, pattern: &str) -> DriverResult<Self> {
        self.conditions.push((field.into(), Matcher::pattern(pattern)?));
        Ok(self)
    }

    /// Order the results.
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Field conditions in declaration order.
    pub fn conditions(&self) -> &[(String, Matcher)] {
        &self.conditions
    }

    /// Check whether a record satisfies every condition.
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions
            .iter()
            .all(|(field, matcher)| matcher.matches(record.get(field)))
    }

    /// Count matching records, ignoring pagination.
    pub fn count<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> u64 {
        records.into_iter().filter(|r| self.matches(r)).count() as u64
    }

    /// Filter, order, and paginate records.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        let mut matched: Vec<Record> = records.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(order) = &self.order_by {
            matched.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.field).unwrap_or(&Value::Null),
                    b.get(&order.field).unwrap_or(&Value::Null),
                );
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        matched.into_iter().skip(offset).take(limit).collect()
    }
}

fn parse_count(key: &str, value: &Value) -> DriverResult<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .map(|n| n as usize)
        .ok_or_else(|| DriverError::InvalidFilter {
            key: key.to_string(),
            reason: format!("expected a non-negative integer, got {}", value),
        })
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Total order over JSON values used for sorting.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
