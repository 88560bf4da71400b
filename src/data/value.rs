use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Timelike};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Canonical value types produced by normalization
///
/// Serialized form is tagged so cached results round-trip without losing the
/// distinction between strings, naive timestamps and offset timestamps. Use
/// [`Value::to_json`] for the plain presentation form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    /// Timestamp without timezone information, kept as the driver reported it
    Timestamp(NaiveDateTime),
    /// Timestamp carrying a UTC offset
    TimestampTz(DateTime<FixedOffset>),
    /// Unparsed pass-through for values with no canonical mapping
    Raw(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Raw(_) => "raw",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Float64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Raw(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::TimestampTz(ts) => Some(ts.naive_utc()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Plain JSON presentation: timestamps become ISO-8601 strings,
    /// non-finite floats become null
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int64(i) => serde_json::json!(i),
            Value::Float64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) | Value::Raw(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(_) | Value::TimestampTz(_) => {
                serde_json::Value::String(self.to_plain_string())
            }
        }
    }

    /// Text form used by exports; null is the empty string
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Timestamp(ts) => format_naive(ts),
            Value::TimestampTz(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            other => other.to_string(),
        }
    }
}

/// ISO-8601 with fractional seconds only when present
pub fn format_naive(ts: &NaiveDateTime) -> String {
    if ts.nanosecond() == 0 {
        ts.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Raw(a), Value::Raw(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            // Offset is part of the canonical form
            (Value::TimestampTz(a), Value::TimestampTz(b)) => {
                a == b && a.offset() == b.offset()
            }
            // Cross-type numeric comparisons
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).to_bits() == b.to_bits(),
            (Value::Float64(a), Value::Int64(b)) => a.to_bits() == (*b as f64).to_bits(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int64(i) => i.hash(state),
            Value::Float64(f) => f.to_bits().hash(state),
            Value::String(s) | Value::Raw(s) => s.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::TimestampTz(t) => {
                t.hash(state);
                t.offset().local_minus_utc().hash(state);
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Raw(a), Value::Raw(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::TimestampTz(a), Value::TimestampTz(b)) => a.cmp(b),
            (Value::Int64(a), Value::Float64(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Float64(a), Value::Int64(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            // Different types: order by type discriminant
            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

impl Value {
    /// Get a numeric order for type comparison
    fn type_order(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int64(_) => 2,
            Value::Float64(_) => 3,
            Value::String(_) => 4,
            Value::Timestamp(_) => 5,
            Value::TimestampTz(_) => 6,
            Value::Raw(_) => 7,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) | Value::Raw(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", format_naive(t)),
            Value::TimestampTz(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// Semantic type assigned to a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Float,
    String,
    Timestamp,
    Boolean,
    /// Backend type with no canonical mapping; values pass through
    Raw,
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticType::Integer => write!(f, "INTEGER"),
            SemanticType::Float => write!(f, "FLOAT"),
            SemanticType::String => write!(f, "STRING"),
            SemanticType::Timestamp => write!(f, "TIMESTAMP"),
            SemanticType::Boolean => write!(f, "BOOLEAN"),
            SemanticType::Raw => write!(f, "RAW"),
        }
    }
}

/// A cell exactly as a driver hands it over, before coercion
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Fixed-point number in its textual form
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(serde_json::Value),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Int64(i) => RawValue::Int(i),
            Value::Float64(f) => RawValue::Float(f),
            Value::String(s) => RawValue::Text(s),
            Value::Timestamp(ts) => RawValue::Timestamp(ts),
            Value::TimestampTz(ts) => RawValue::TimestampTz(ts),
            Value::Raw(s) => RawValue::Text(s),
        }
    }
}

/// Column data type for the embedded backend's schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Null,
    #[serde(alias = "BOOL")]
    Boolean,
    #[serde(alias = "INT", alias = "INTEGER", alias = "INT64")]
    Bigint,
    #[serde(alias = "FLOAT", alias = "FLOAT64")]
    Double,
    #[serde(alias = "STRING", alias = "TEXT")]
    Varchar,
    Timestamp,
}

impl DataType {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Boolean,
            Value::Int64(_) => DataType::Bigint,
            Value::Float64(_) => DataType::Double,
            Value::String(_) | Value::Raw(_) => DataType::Varchar,
            Value::Timestamp(_) | Value::TimestampTz(_) => DataType::Timestamp,
        }
    }

    /// Type tag reported in column descriptors
    pub fn type_tag(&self) -> &'static str {
        match self {
            DataType::Null => "NULL",
            DataType::Boolean => "BOOLEAN",
            DataType::Bigint => "BIGINT",
            DataType::Double => "DOUBLE",
            DataType::Varchar => "VARCHAR",
            DataType::Timestamp => "TIMESTAMP",
        }
    }

    /// Convert a JSON fixture cell into a value of this type
    pub fn value_from_json(&self, json: &serde_json::Value) -> Option<Value> {
        if json.is_null() {
            return Some(Value::Null);
        }
        match self {
            DataType::Null => None,
            DataType::Boolean => json.as_bool().map(Value::Bool),
            DataType::Bigint => json.as_i64().map(Value::Int64),
            DataType::Double => json.as_f64().map(Value::Float64),
            DataType::Varchar => match json {
                serde_json::Value::String(s) => Some(Value::String(s.clone())),
                other => Some(Value::String(other.to_string())),
            },
            DataType::Timestamp => json.as_str().and_then(parse_timestamp_literal),
        }
    }
}

/// Parse ISO-ish timestamp text: RFC 3339 keeps its offset, everything else is naive
pub fn parse_timestamp_literal(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(Value::TimestampTz(ts));
    }
    parse_naive_timestamp(text).map(Value::Timestamp)
}

/// Parse naive `YYYY-MM-DD[( |T)HH:MM[:SS[.f]]]` text
pub fn parse_naive_timestamp(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let text = text.trim();
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        parse_naive_timestamp(s).unwrap()
    }

    #[test]
    fn test_value_ordering() {
        assert!(Value::Int64(1) < Value::Int64(2));
        assert!(Value::String("a".into()) < Value::String("b".into()));
        assert!(Value::Null < Value::Int64(0));
        assert!(Value::Timestamp(ts("2017-01-01")) < Value::Timestamp(ts("2017-01-02")));
    }

    #[test]
    fn test_offset_is_part_of_equality() {
        let plus_one = DateTime::parse_from_rfc3339("2017-11-18T21:53:00+01:00").unwrap();
        let utc = plus_one.with_timezone(&FixedOffset::east_opt(0).unwrap());
        assert_eq!(plus_one, utc);
        assert_ne!(Value::TimestampTz(plus_one), Value::TimestampTz(utc));
    }

    #[test]
    fn test_json_presentation() {
        assert_eq!(Value::Int64(3).to_json(), serde_json::json!(3));
        assert_eq!(Value::Float64(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(
            Value::Timestamp(ts("2017-10-19 23:39:16.660")).to_json(),
            serde_json::json!("2017-10-19T23:39:16.660000")
        );
        assert_eq!(
            Value::Timestamp(ts("2017-01-01")).to_json(),
            serde_json::json!("2017-01-01T00:00:00")
        );
    }

    #[test]
    fn test_tagged_serialization_keeps_timestamp_kind() {
        let original = vec![
            Value::String("2017-01-01T00:00:00".into()),
            Value::Timestamp(ts("2017-01-01")),
            Value::TimestampTz(DateTime::parse_from_rfc3339("2017-11-18T21:53:00+01:00").unwrap()),
        ];
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Vec<Value> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_fixture_cells() {
        let json = serde_json::json!("2017-01-01 00:00:00");
        assert_eq!(
            DataType::Timestamp.value_from_json(&json),
            Some(Value::Timestamp(ts("2017-01-01")))
        );
        assert_eq!(
            DataType::Bigint.value_from_json(&serde_json::json!(42)),
            Some(Value::Int64(42))
        );
        assert_eq!(DataType::Bigint.value_from_json(&serde_json::json!("x")), None);
    }
}
