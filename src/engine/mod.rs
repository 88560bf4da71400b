//! Per-backend engine specs
//!
//! An [`EngineSpec`] is plain data describing one SQL dialect: how to map
//! driver type tags to semantic types, how to quote identifiers, how to
//! truncate timestamps to a grain, how to cap row counts and how to spell a
//! timestamp literal. Specs are looked up by dialect id through the
//! [`EngineSpecRegistry`].

pub mod dialects;
pub mod grain;
pub mod registry;

pub use grain::TimeGrain;
pub use registry::EngineSpecRegistry;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

use crate::data::value::{format_naive, parse_timestamp_literal};
use crate::data::{RawValue, SemanticType, Value};

/// How a dialect caps the number of returned rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStrategy {
    /// Trailing `LIMIT n`
    Clause,
    /// `SELECT * FROM (<sql>) AS inner_qry LIMIT n`
    Wrap,
    /// `SELECT * FROM (<sql>) WHERE ROWNUM <= n`
    RowNum,
    /// `SELECT TOP n ...`
    Top,
}

/// What happens to offset-carrying timestamps during coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPolicy {
    #[default]
    PreserveOffset,
    ConvertToUtc,
}

/// Spelling of a timestamp literal inside generated SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatetimeLiteral {
    /// `'2017-01-01 00:00:00'`
    #[default]
    Quoted,
    /// `CONVERT(DATETIME, '2017-01-01T00:00:00', 126)`
    Convert126,
    /// `TO_TIMESTAMP('2017-01-01T00:00:00.000000', 'YYYY-MM-DD"T"HH24:MI:SS.ff6')`
    ToTimestamp,
    /// `STR_TO_DATE('2017-01-01 00:00:00.000000', '%Y-%m-%d %H:%i:%s.%f')`
    StrToDate,
    /// `from_iso8601_timestamp('2017-01-01T00:00:00.000000')`
    FromIso8601,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unknown dialect: {0}")]
    UnknownDialect(String),

    #[error("Time grain {grain} is not supported by {dialect}")]
    UnsupportedGrain { dialect: String, grain: TimeGrain },
}

/// Dialect adapter
#[derive(Debug, Clone)]
pub struct EngineSpec {
    /// Registry id, lowercase
    pub id: String,
    /// Upper-cased, parameter-stripped type tag -> semantic type
    pub type_map: HashMap<String, SemanticType>,
    /// Opening and closing identifier quote
    pub quote: (char, char),
    /// Grain -> SQL template with a `{col}` placeholder
    pub grains: HashMap<TimeGrain, String>,
    pub limit_strategy: LimitStrategy,
    pub timestamp_policy: TimestampPolicy,
    pub datetime_literal: DatetimeLiteral,
    /// Name understood by `sqlparser::dialect::dialect_from_str`
    pub parser_dialect: String,
    /// Whether statements other than SELECT may be submitted through the SQL path
    pub allow_dml: bool,
}

fn tag_params_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\(.*\)").expect("static regex"))
}

fn trailing_limit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // LIMIT n | LIMIT offset, n | LIMIT n OFFSET m
    RE.get_or_init(|| {
        Regex::new(r"(?is)\bLIMIT\s+(?:(\d+)\s*,\s*)?(\d+)(?:\s+OFFSET\s+(\d+))?\s*$").expect("static regex")
    })
}

fn select_head_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^(\s*SELECT(?:\s+DISTINCT)?)\s+(?:TOP\s+(\d+)\s+)?").expect("static regex")
    })
}

impl EngineSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into().to_lowercase(),
            type_map: dialects::base_type_map(),
            quote: ('"', '"'),
            grains: HashMap::new(),
            limit_strategy: LimitStrategy::Clause,
            timestamp_policy: TimestampPolicy::PreserveOffset,
            datetime_literal: DatetimeLiteral::Quoted,
            parser_dialect: "generic".to_string(),
            allow_dml: false,
        }
    }

    pub fn with_quote(mut self, open: char, close: char) -> Self {
        self.quote = (open, close);
        self
    }

    pub fn with_type(mut self, tag: &str, semantic: SemanticType) -> Self {
        self.type_map.insert(tag.to_uppercase(), semantic);
        self
    }

    pub fn with_grain(mut self, grain: TimeGrain, template: &str) -> Self {
        self.grains.insert(grain, template.to_string());
        self
    }

    pub fn with_limit_strategy(mut self, strategy: LimitStrategy) -> Self {
        self.limit_strategy = strategy;
        self
    }

    pub fn with_timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.timestamp_policy = policy;
        self
    }

    pub fn with_datetime_literal(mut self, literal: DatetimeLiteral) -> Self {
        self.datetime_literal = literal;
        self
    }

    pub fn with_parser_dialect(mut self, name: &str) -> Self {
        self.parser_dialect = name.to_string();
        self
    }

    pub fn with_allow_dml(mut self, allow: bool) -> Self {
        self.allow_dml = allow;
        self
    }

    /// sqlparser dialect for this engine, generic when sqlparser has no match
    pub fn sql_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        sqlparser::dialect::dialect_from_str(&self.parser_dialect)
            .unwrap_or_else(|| Box::new(sqlparser::dialect::GenericDialect {}))
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.quote;
        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push(open);
        for ch in name.chars() {
            if ch == close {
                quoted.push(close);
            }
            quoted.push(ch);
        }
        quoted.push(close);
        quoted
    }

    /// Quote a possibly schema-qualified table name part by part
    pub fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Semantic type of a driver type tag; unknown tags map to `Raw`
    pub fn semantic_type(&self, type_tag: &str) -> SemanticType {
        let stripped = tag_params_regex().replace_all(type_tag.trim(), "");
        let key = stripped.trim().to_uppercase();
        if let Some(semantic) = self.type_map.get(&key) {
            return *semantic;
        }
        // "TIMESTAMP WITH TIME ZONE", "DOUBLE PRECISION", ...
        key.split_whitespace()
            .next()
            .and_then(|head| self.type_map.get(head))
            .copied()
            .unwrap_or(SemanticType::Raw)
    }

    /// Total coercion of one driver value
    pub fn coerce(&self, type_tag: Option<&str>, raw: RawValue) -> (SemanticType, Value) {
        let semantic = match type_tag {
            Some(tag) => self.semantic_type(tag),
            None => match infer_semantic_type(&raw) {
                Some(semantic) => semantic,
                None => return (SemanticType::Raw, self.passthrough(raw)),
            },
        };
        (semantic, self.convert(semantic, raw))
    }

    /// Convert into `semantic`, passing the value through when it does not fit
    pub fn convert(&self, semantic: SemanticType, raw: RawValue) -> Value {
        let converted = match (semantic, &raw) {
            (_, RawValue::Null) => Some(Value::Null),
            (SemanticType::Integer, RawValue::Int(i)) => Some(Value::Int64(*i)),
            (SemanticType::Integer, RawValue::Bool(b)) => Some(Value::Int64(*b as i64)),
            (SemanticType::Integer, RawValue::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Some(Value::Int64(*f as i64))
            }
            (SemanticType::Integer, RawValue::Decimal(s) | RawValue::Text(s)) => {
                s.trim().parse::<i64>().ok().map(Value::Int64)
            }
            (SemanticType::Float, RawValue::Float(f)) => Some(Value::Float64(*f)),
            (SemanticType::Float, RawValue::Int(i)) => Some(Value::Float64(*i as f64)),
            (SemanticType::Float, RawValue::Decimal(s) | RawValue::Text(s)) => {
                s.trim().parse::<f64>().ok().map(Value::Float64)
            }
            (SemanticType::String, RawValue::Text(s)) => Some(Value::String(s.clone())),
            (SemanticType::String, RawValue::Bytes(b)) => {
                std::str::from_utf8(b).ok().map(|s| Value::String(s.to_string()))
            }
            (SemanticType::String, RawValue::Int(i)) => Some(Value::String(i.to_string())),
            (SemanticType::String, RawValue::Decimal(s)) => Some(Value::String(s.clone())),
            (SemanticType::Boolean, RawValue::Bool(b)) => Some(Value::Bool(*b)),
            (SemanticType::Boolean, RawValue::Int(i)) if *i == 0 || *i == 1 => {
                Some(Value::Bool(*i == 1))
            }
            (SemanticType::Boolean, RawValue::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "f" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            (SemanticType::Timestamp, RawValue::Timestamp(ts)) => Some(Value::Timestamp(*ts)),
            (SemanticType::Timestamp, RawValue::TimestampTz(ts)) => Some(self.offset_timestamp(*ts)),
            (SemanticType::Timestamp, RawValue::Date(d)) => {
                d.and_hms_opt(0, 0, 0).map(Value::Timestamp)
            }
            (SemanticType::Timestamp, RawValue::Text(s)) => {
                parse_timestamp_literal(s).map(|value| match value {
                    Value::TimestampTz(ts) => self.offset_timestamp(ts),
                    other => other,
                })
            }
            _ => None,
        };
        converted.unwrap_or_else(|| self.passthrough(raw))
    }

    /// Value with no target type: keep the driver's own shape
    pub fn passthrough(&self, raw: RawValue) -> Value {
        match raw {
            RawValue::Null => Value::Null,
            RawValue::Bool(b) => Value::Bool(b),
            RawValue::Int(i) => Value::Int64(i),
            RawValue::Float(f) => Value::Float64(f),
            RawValue::Decimal(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float64)
                .unwrap_or(Value::Raw(s)),
            RawValue::Text(s) => Value::String(s),
            RawValue::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => Value::Raw(s),
                Err(e) => Value::Raw(hex::encode(e.into_bytes())),
            },
            RawValue::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(Value::Timestamp)
                .unwrap_or(Value::Null),
            RawValue::Timestamp(ts) => Value::Timestamp(ts),
            RawValue::TimestampTz(ts) => self.offset_timestamp(ts),
            RawValue::Json(json) => Value::Raw(json.to_string()),
        }
    }

    fn offset_timestamp(&self, ts: DateTime<FixedOffset>) -> Value {
        match self.timestamp_policy {
            TimestampPolicy::PreserveOffset => Value::TimestampTz(ts),
            TimestampPolicy::ConvertToUtc => Value::TimestampTz(ts.with_timezone(&Utc).fixed_offset()),
        }
    }

    /// SQL truncating `column` to `grain`, or `None` when unsupported
    pub fn time_grain_expression(&self, grain: Option<TimeGrain>, column: &str) -> Option<String> {
        let quoted = self.quote_identifier(column);
        match grain {
            None => Some(quoted),
            Some(grain) => self
                .grains
                .get(&grain)
                .map(|template| template.replace("{col}", &quoted)),
        }
    }

    pub fn supported_grains(&self) -> Vec<TimeGrain> {
        let mut grains: Vec<TimeGrain> = self.grains.keys().copied().collect();
        grains.sort();
        grains
    }

    /// Cap `sql` at `limit` rows using the dialect's strategy
    pub fn apply_row_limit(&self, sql: &str, limit: usize) -> String {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        match self.limit_strategy {
            LimitStrategy::Clause => {
                if let Some(caps) = trailing_limit_regex().captures(sql) {
                    let existing = caps[2].parse::<usize>().unwrap_or(usize::MAX).min(limit);
                    let start = caps.get(0).map(|m| m.start()).unwrap_or(sql.len());
                    match (caps.get(1), caps.get(3)) {
                        (Some(offset), _) => format!("{}LIMIT {}, {}", &sql[..start], offset.as_str(), existing),
                        (None, Some(offset)) => {
                            format!("{}LIMIT {} OFFSET {}", &sql[..start], existing, offset.as_str())
                        }
                        (None, None) => format!("{}LIMIT {}", &sql[..start], existing),
                    }
                } else {
                    format!("{}\nLIMIT {}", sql, limit)
                }
            }
            LimitStrategy::Wrap => {
                format!("SELECT * FROM (\n{}\n) AS inner_qry LIMIT {}", sql, limit)
            }
            LimitStrategy::RowNum => {
                format!("SELECT * FROM (\n{}\n) WHERE ROWNUM <= {}", sql, limit)
            }
            LimitStrategy::Top => match select_head_regex().captures(sql) {
                Some(caps) => {
                    let head = &caps[1];
                    let existing = caps
                        .get(2)
                        .and_then(|m| m.as_str().parse::<usize>().ok())
                        .unwrap_or(usize::MAX);
                    let rest = &sql[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
                    format!("{} TOP {} {}", head.trim_start(), existing.min(limit), rest)
                }
                None => format!("SELECT TOP {} * FROM (\n{}\n) AS inner_qry", limit, sql),
            },
        }
    }

    pub fn datetime_literal(&self, ts: &NaiveDateTime) -> String {
        match self.datetime_literal {
            DatetimeLiteral::Quoted => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
            DatetimeLiteral::Convert126 => format!("CONVERT(DATETIME, '{}', 126)", format_naive(ts)),
            DatetimeLiteral::ToTimestamp => format!(
                "TO_TIMESTAMP('{}', 'YYYY-MM-DD\"T\"HH24:MI:SS.ff6')",
                ts.format("%Y-%m-%dT%H:%M:%S%.6f")
            ),
            DatetimeLiteral::StrToDate => format!(
                "STR_TO_DATE('{}', '%Y-%m-%d %H:%i:%s.%f')",
                ts.format("%Y-%m-%d %H:%M:%S%.6f")
            ),
            DatetimeLiteral::FromIso8601 => format!(
                "from_iso8601_timestamp('{}')",
                ts.format("%Y-%m-%dT%H:%M:%S%.6f")
            ),
        }
    }

    /// `SELECT *` preview of a table with the row limit applied
    pub fn select_star(&self, table: &str, limit: Option<usize>) -> String {
        let sql = format!("SELECT *\nFROM {}", self.quote_table(table));
        match limit {
            Some(limit) => self.apply_row_limit(&sql, limit),
            None => sql,
        }
    }
}

/// Semantic type implied by the shape of a driver value
pub fn infer_semantic_type(raw: &RawValue) -> Option<SemanticType> {
    match raw {
        RawValue::Null => None,
        RawValue::Bool(_) => Some(SemanticType::Boolean),
        RawValue::Int(_) => Some(SemanticType::Integer),
        RawValue::Float(_) | RawValue::Decimal(_) => Some(SemanticType::Float),
        RawValue::Text(_) => Some(SemanticType::String),
        RawValue::Date(_) | RawValue::Timestamp(_) | RawValue::TimestampTz(_) => {
            Some(SemanticType::Timestamp)
        }
        RawValue::Bytes(_) | RawValue::Json(_) => Some(SemanticType::Raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::value::parse_naive_timestamp;

    fn spec(id: &str) -> EngineSpec {
        EngineSpecRegistry::default().resolve(id).unwrap().as_ref().clone()
    }

    #[test]
    fn test_type_tags_ignore_case_and_params() {
        let pg = spec("postgres");
        assert_eq!(pg.semantic_type("VARCHAR(255)"), SemanticType::String);
        assert_eq!(pg.semantic_type("varchar"), SemanticType::String);
        assert_eq!(pg.semantic_type("NUMERIC(10, 2)"), SemanticType::Float);
        assert_eq!(pg.semantic_type("timestamp with time zone"), SemanticType::Timestamp);
        assert_eq!(pg.semantic_type("GEOMETRY"), SemanticType::Raw);
    }

    #[test]
    fn test_coerce_is_total() {
        let pg = spec("postgres");
        assert_eq!(
            pg.coerce(Some("GEOMETRY"), RawValue::Bytes(vec![0xff, 0x00])),
            (SemanticType::Raw, Value::Raw("ff00".into()))
        );
        assert_eq!(
            pg.coerce(Some("INTEGER"), RawValue::Text("abc".into())),
            (SemanticType::Integer, Value::String("abc".into()))
        );
        assert_eq!(
            pg.coerce(Some("NUMERIC"), RawValue::Decimal("1.50".into())),
            (SemanticType::Float, Value::Float64(1.5))
        );
        assert_eq!(
            pg.coerce(None, RawValue::Int(7)),
            (SemanticType::Integer, Value::Int64(7))
        );
        assert_eq!(pg.coerce(None, RawValue::Null), (SemanticType::Raw, Value::Null));
    }

    #[test]
    fn test_offset_policy() {
        let ts = DateTime::parse_from_rfc3339("2017-11-18T21:53:00+01:00").unwrap();
        let preserved = spec("postgres").coerce(Some("TIMESTAMPTZ"), RawValue::TimestampTz(ts)).1;
        assert_eq!(preserved, Value::TimestampTz(ts));
        assert_eq!(preserved.to_json(), serde_json::json!("2017-11-18T21:53:00+01:00"));

        let utc = spec("postgres")
            .with_timestamp_policy(TimestampPolicy::ConvertToUtc)
            .coerce(Some("TIMESTAMPTZ"), RawValue::TimestampTz(ts))
            .1;
        assert_eq!(utc.to_json(), serde_json::json!("2017-11-18T20:53:00+00:00"));
    }

    #[test]
    fn test_naive_text_stays_naive() {
        let (_, value) = spec("sqlite").coerce(Some("DATETIME"), RawValue::Text("2017-01-01 10:00:00".into()));
        assert_eq!(
            value,
            Value::Timestamp(parse_naive_timestamp("2017-01-01 10:00:00").unwrap())
        );
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(spec("postgres").quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(spec("mysql").quote_identifier("a`b"), "`a``b`");
        assert_eq!(spec("mssql").quote_identifier("a]b"), "[a]]b]");
        assert_eq!(spec("postgres").quote_table("main.birth_names"), "\"main\".\"birth_names\"");
    }

    #[test]
    fn test_limit_clause() {
        let pg = spec("postgres");
        assert_eq!(pg.apply_row_limit("SELECT 1", 10), "SELECT 1\nLIMIT 10");
        assert_eq!(pg.apply_row_limit("SELECT 1 LIMIT 500;", 10), "SELECT 1 LIMIT 10");
        assert_eq!(pg.apply_row_limit("SELECT 1 limit 5", 10), "SELECT 1 LIMIT 5");
        assert_eq!(
            pg.apply_row_limit("SELECT a FROM t LIMIT 200 OFFSET 10", 100),
            "SELECT a FROM t LIMIT 100 OFFSET 10"
        );
        assert_eq!(
            pg.apply_row_limit("SELECT a FROM t limit 2 offset 1", 100),
            "SELECT a FROM t LIMIT 2 OFFSET 1"
        );
        assert_eq!(pg.apply_row_limit("SELECT a FROM t LIMIT 10, 500", 100), "SELECT a FROM t LIMIT 10, 100");
    }

    #[test]
    fn test_limit_top_and_rownum() {
        let mssql = spec("mssql");
        assert_eq!(mssql.apply_row_limit("SELECT a FROM t", 100), "SELECT TOP 100 a FROM t");
        assert_eq!(
            mssql.apply_row_limit("select distinct a from t", 100),
            "select distinct TOP 100 a from t"
        );
        assert_eq!(mssql.apply_row_limit("SELECT TOP 5 a FROM t", 100), "SELECT TOP 5 a FROM t");

        let oracle = spec("oracle");
        assert_eq!(
            oracle.apply_row_limit("SELECT a FROM t", 3),
            "SELECT * FROM (\nSELECT a FROM t\n) WHERE ROWNUM <= 3"
        );
    }

    #[test]
    fn test_grain_expressions() {
        let pg = spec("postgres");
        assert_eq!(
            pg.time_grain_expression(Some(TimeGrain::Day), "ds").unwrap(),
            "DATE_TRUNC('day', \"ds\")"
        );
        assert_eq!(pg.time_grain_expression(None, "ds").unwrap(), "\"ds\"");
        assert!(pg.time_grain_expression(Some(TimeGrain::FiveMinutes), "ds").is_none());
    }

    #[test]
    fn test_datetime_literals() {
        let ts = parse_naive_timestamp("2017-01-01 00:00:00").unwrap();
        assert_eq!(spec("sqlite").datetime_literal(&ts), "'2017-01-01 00:00:00'");
        assert_eq!(
            spec("mssql").datetime_literal(&ts),
            "CONVERT(DATETIME, '2017-01-01T00:00:00', 126)"
        );
        assert!(spec("oracle").datetime_literal(&ts).starts_with("TO_TIMESTAMP('2017-01-01T00:00:00.000000'"));
    }

    #[test]
    fn test_select_star() {
        assert_eq!(
            spec("sqlite").select_star("birth_names", Some(100)),
            "SELECT *\nFROM \"birth_names\"\nLIMIT 100"
        );
        assert_eq!(
            spec("mssql").select_star("birth_names", Some(100)),
            "SELECT TOP 100 *\nFROM [birth_names]"
        );
    }
}
