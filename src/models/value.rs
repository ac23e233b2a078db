use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Default textual date-time layout used when a string is compared with a timestamp.
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single SQL value as seen by the router: literals, bound parameters and result cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Float(f64),
    String(String),
    Timestamp(NaiveDateTime),
}

/// Coarse type family, used to detect values that cannot be merged together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFamily {
    Null,
    Boolean,
    Numeric,
    Text,
    Temporal,
}

impl fmt::Display for ValueFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueFamily::Null => "null",
            ValueFamily::Boolean => "boolean",
            ValueFamily::Numeric => "numeric",
            ValueFamily::Text => "text",
            ValueFamily::Temporal => "temporal",
        };
        f.write_str(name)
    }
}

/// Hashable, value-based key for grouping. Numbers of different representations
/// (1, 1.0, 1.00) collapse to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Boolean(bool),
    Numeric(String),
    Text(String),
    Temporal(NaiveDateTime),
}

impl Value {
    pub fn family(&self) -> ValueFamily {
        match self {
            Value::Null => ValueFamily::Null,
            Value::Boolean(_) => ValueFamily::Boolean,
            Value::Integer(_) | Value::Decimal(_) | Value::Float(_) => ValueFamily::Numeric,
            Value::String(_) => ValueFamily::Text,
            Value::Timestamp(_) => ValueFamily::Temporal,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(v) => Some(Decimal::from(*v)),
            Value::Decimal(d) => Some(*d),
            Value::Float(f) => Decimal::from_f64(*f),
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    /// Interprets the value as a date-time, parsing strings with `format`
    /// (falling back to a bare date).
    pub fn as_timestamp(&self, format: &str) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::String(s) => parse_datetime(s.trim(), format),
            _ => None,
        }
    }

    /// Stable textual form, used for hashing and for matching algorithm targets.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }

    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Boolean(b) => ValueKey::Boolean(*b),
            Value::Integer(v) => ValueKey::Numeric(Decimal::from(*v).normalize().to_string()),
            Value::Decimal(d) => ValueKey::Numeric(d.normalize().to_string()),
            Value::Float(f) => match Decimal::from_f64(*f) {
                Some(d) => ValueKey::Numeric(d.normalize().to_string()),
                None => ValueKey::Numeric(format!("{:?}", f)),
            },
            Value::String(s) => ValueKey::Text(s.clone()),
            Value::Timestamp(ts) => ValueKey::Temporal(*ts),
        }
    }

    /// Compares two values of compatible families. Returns `None` when the
    /// families cannot be ordered against each other.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), b) if b.family() == ValueFamily::Numeric => {
                b.as_f64().and_then(|b| a.partial_cmp(&b))
            }
            (a, Value::Float(b)) if a.family() == ValueFamily::Numeric => {
                a.as_f64().and_then(|a| a.partial_cmp(b))
            }
            (a, b) if a.family() == ValueFamily::Numeric && b.family() == ValueFamily::Numeric => {
                Some(a.as_decimal()?.cmp(&b.as_decimal()?))
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::String(b)) => {
                parse_datetime(b, DEFAULT_DATETIME_FORMAT).map(|b| a.cmp(&b))
            }
            (Value::String(a), Value::Timestamp(b)) => {
                parse_datetime(a, DEFAULT_DATETIME_FORMAT).map(|a| a.cmp(b))
            }
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Decimal(d) => d.to_f64(),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Renders the value as an SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Boolean(true) => "TRUE".to_string(),
            Value::Boolean(false) => "FALSE".to_string(),
            Value::Integer(_) | Value::Decimal(_) | Value::Float(_) => self.canonical_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Decimal(Decimal::from(u))
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(v) => serde_json::Value::from(*v),
            Value::Decimal(d) => serde_json::Value::String(d.normalize().to_string()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            other => f.write_str(&other.canonical_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

fn parse_datetime(text: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(text, DEFAULT_DATETIME_FORMAT).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_collapse_representations() {
        let int = Value::Integer(10);
        let dec = Value::Decimal(Decimal::new(1000, 2));
        let float = Value::Float(10.0);
        assert_eq!(int.key(), dec.key());
        assert_eq!(int.key(), float.key());
        assert_ne!(int.key(), Value::String("10".to_string()).key());
    }

    #[test]
    fn test_compare_across_numeric_representations() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Decimal(Decimal::new(25, 1))),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Float(3.5).compare(&Value::Integer(3)), Some(Ordering::Greater));
        assert_eq!(Value::Integer(1).compare(&Value::String("1".to_string())), None);
    }

    #[test]
    fn test_compare_timestamp_with_string() {
        let ts = NaiveDate::from_ymd_opt(2021, 6, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        let value = Value::Timestamp(ts);
        assert_eq!(
            value.compare(&Value::String("2021-06-01 00:00:00".to_string())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            value.compare(&Value::String("2021-07-01".to_string())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(Value::String("it's".to_string()).to_sql_literal(), "'it''s'");
        assert_eq!(Value::Integer(-5).to_sql_literal(), "-5");
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&serde_json::json!(42)), Value::Integer(42));
        assert_eq!(Value::from_json(&serde_json::json!("a")), Value::String("a".to_string()));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from_json(&serde_json::Value::Null), Value::Null);
    }

    #[test]
    fn test_as_i64_accepts_integral_forms() {
        assert_eq!(Value::String(" 7 ".to_string()).as_i64(), Some(7));
        assert_eq!(Value::Decimal(Decimal::new(700, 2)).as_i64(), Some(7));
        assert_eq!(Value::Decimal(Decimal::new(701, 2)).as_i64(), None);
    }
}
