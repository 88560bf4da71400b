//! Built-in dialect definitions

use std::collections::HashMap;

use super::{DatetimeLiteral, EngineSpec, LimitStrategy, TimeGrain};
use crate::data::SemanticType;

/// Type tags shared by every dialect
pub fn base_type_map() -> HashMap<String, SemanticType> {
    use SemanticType::*;

    let entries: &[(&str, SemanticType)] = &[
        ("INT", Integer),
        ("INTEGER", Integer),
        ("INT2", Integer),
        ("INT4", Integer),
        ("INT8", Integer),
        ("SMALLINT", Integer),
        ("TINYINT", Integer),
        ("MEDIUMINT", Integer),
        ("BIGINT", Integer),
        ("SERIAL", Integer),
        ("BIGSERIAL", Integer),
        ("FLOAT", Float),
        ("FLOAT4", Float),
        ("FLOAT8", Float),
        ("REAL", Float),
        ("DOUBLE", Float),
        ("DECIMAL", Float),
        ("NUMERIC", Float),
        ("NUMBER", Float),
        ("MONEY", Float),
        ("CHAR", String),
        ("NCHAR", String),
        ("VARCHAR", String),
        ("NVARCHAR", String),
        ("VARCHAR2", String),
        ("NVARCHAR2", String),
        ("TEXT", String),
        ("NTEXT", String),
        ("CLOB", String),
        ("STRING", String),
        ("CHARACTER", String),
        ("DATE", Timestamp),
        ("DATETIME", Timestamp),
        ("DATETIME2", Timestamp),
        ("DATETIMEOFFSET", Timestamp),
        ("SMALLDATETIME", Timestamp),
        ("TIMESTAMP", Timestamp),
        ("TIMESTAMPTZ", Timestamp),
        ("BOOL", Boolean),
        ("BOOLEAN", Boolean),
        ("BIT", Boolean),
    ];
    entries
        .iter()
        .map(|(tag, semantic)| (tag.to_string(), *semantic))
        .collect()
}

fn with_grains(mut spec: EngineSpec, grains: &[(TimeGrain, &str)]) -> EngineSpec {
    for (grain, template) in grains {
        spec = spec.with_grain(*grain, template);
    }
    spec
}

pub fn sqlite() -> EngineSpec {
    with_grains(
        EngineSpec::new("sqlite").with_parser_dialect("sqlite"),
        &[
            (TimeGrain::Second, "DATETIME(STRFTIME('%Y-%m-%dT%H:%M:%S', {col}))"),
            (TimeGrain::Minute, "DATETIME(STRFTIME('%Y-%m-%dT%H:%M:00', {col}))"),
            (TimeGrain::Hour, "DATETIME(STRFTIME('%Y-%m-%dT%H:00:00', {col}))"),
            (TimeGrain::Day, "DATETIME({col}, 'start of day')"),
            (TimeGrain::Week, "DATETIME(DATE({col}, -STRFTIME('%w', {col}) || ' days'), 'start of day')"),
            (TimeGrain::Month, "DATETIME({col}, 'start of month')"),
            (TimeGrain::Year, "DATETIME({col}, 'start of year')"),
        ],
    )
}

pub fn postgres() -> EngineSpec {
    with_grains(
        EngineSpec::new("postgres").with_parser_dialect("postgres"),
        &[
            (TimeGrain::Second, "DATE_TRUNC('second', {col})"),
            (TimeGrain::Minute, "DATE_TRUNC('minute', {col})"),
            (TimeGrain::Hour, "DATE_TRUNC('hour', {col})"),
            (TimeGrain::Day, "DATE_TRUNC('day', {col})"),
            (TimeGrain::Week, "DATE_TRUNC('week', {col})"),
            (TimeGrain::Month, "DATE_TRUNC('month', {col})"),
            (TimeGrain::Quarter, "DATE_TRUNC('quarter', {col})"),
            (TimeGrain::Year, "DATE_TRUNC('year', {col})"),
        ],
    )
    .with_type("JSONB", SemanticType::Raw)
    .with_type("UUID", SemanticType::String)
}

pub fn mysql() -> EngineSpec {
    with_grains(
        EngineSpec::new("mysql")
            .with_parser_dialect("mysql")
            .with_quote('`', '`')
            .with_datetime_literal(DatetimeLiteral::StrToDate),
        &[
            (
                TimeGrain::Second,
                "DATE_ADD(DATE({col}), INTERVAL (HOUR({col})*60*60 + MINUTE({col})*60 + SECOND({col})) SECOND)",
            ),
            (
                TimeGrain::Minute,
                "DATE_ADD(DATE({col}), INTERVAL (HOUR({col})*60 + MINUTE({col})) MINUTE)",
            ),
            (TimeGrain::Hour, "DATE_ADD(DATE({col}), INTERVAL HOUR({col}) HOUR)"),
            (TimeGrain::Day, "DATE({col})"),
            (TimeGrain::Week, "DATE(DATE_SUB({col}, INTERVAL DAYOFWEEK({col}) - 1 DAY))"),
            (TimeGrain::Month, "DATE(DATE_SUB({col}, INTERVAL DAYOFMONTH({col}) - 1 DAY))"),
            (
                TimeGrain::Quarter,
                "MAKEDATE(YEAR({col}), 1) + INTERVAL QUARTER({col}) QUARTER - INTERVAL 1 QUARTER",
            ),
            (TimeGrain::Year, "DATE(DATE_SUB({col}, INTERVAL DAYOFYEAR({col}) - 1 DAY))"),
        ],
    )
}

pub fn mssql() -> EngineSpec {
    with_grains(
        EngineSpec::new("mssql")
            .with_parser_dialect("mssql")
            .with_quote('[', ']')
            .with_limit_strategy(LimitStrategy::Top)
            .with_datetime_literal(DatetimeLiteral::Convert126),
        &[
            (TimeGrain::Second, "DATEADD(second, DATEDIFF(second, '2000-01-01', {col}), '2000-01-01')"),
            (TimeGrain::Minute, "DATEADD(minute, DATEDIFF(minute, 0, {col}), 0)"),
            (TimeGrain::FiveMinutes, "DATEADD(minute, DATEDIFF(minute, 0, {col}) / 5 * 5, 0)"),
            (TimeGrain::FifteenMinutes, "DATEADD(minute, DATEDIFF(minute, 0, {col}) / 15 * 15, 0)"),
            (TimeGrain::HalfHour, "DATEADD(minute, DATEDIFF(minute, 0, {col}) / 30 * 30, 0)"),
            (TimeGrain::Hour, "DATEADD(hour, DATEDIFF(hour, 0, {col}), 0)"),
            (TimeGrain::Day, "DATEADD(day, DATEDIFF(day, 0, {col}), 0)"),
            (TimeGrain::Week, "DATEADD(week, DATEDIFF(week, 0, DATEADD(day, -1, {col})), 0)"),
            (TimeGrain::Month, "DATEADD(month, DATEDIFF(month, 0, {col}), 0)"),
            (TimeGrain::Quarter, "DATEADD(quarter, DATEDIFF(quarter, 0, {col}), 0)"),
            (TimeGrain::Year, "DATEADD(year, DATEDIFF(year, 0, {col}), 0)"),
        ],
    )
    .with_type("UNIQUEIDENTIFIER", SemanticType::String)
}

pub fn oracle() -> EngineSpec {
    with_grains(
        EngineSpec::new("oracle")
            .with_limit_strategy(LimitStrategy::RowNum)
            .with_datetime_literal(DatetimeLiteral::ToTimestamp),
        &[
            (TimeGrain::Second, "CAST({col} as DATE)"),
            (TimeGrain::Minute, "TRUNC(CAST({col} as DATE), 'MI')"),
            (TimeGrain::Hour, "TRUNC(CAST({col} as DATE), 'HH')"),
            (TimeGrain::Day, "TRUNC(CAST({col} as DATE), 'DDD')"),
            (TimeGrain::Week, "TRUNC(CAST({col} as DATE), 'WW')"),
            (TimeGrain::Month, "TRUNC(CAST({col} as DATE), 'MONTH')"),
            (TimeGrain::Quarter, "TRUNC(CAST({col} as DATE), 'Q')"),
            (TimeGrain::Year, "TRUNC(CAST({col} as DATE), 'YEAR')"),
        ],
    )
}

pub fn presto() -> EngineSpec {
    with_grains(
        EngineSpec::new("presto")
            .with_limit_strategy(LimitStrategy::Wrap)
            .with_datetime_literal(DatetimeLiteral::FromIso8601),
        &[
            (TimeGrain::Second, "date_trunc('second', CAST({col} AS TIMESTAMP))"),
            (TimeGrain::Minute, "date_trunc('minute', CAST({col} AS TIMESTAMP))"),
            (TimeGrain::Hour, "date_trunc('hour', CAST({col} AS TIMESTAMP))"),
            (TimeGrain::Day, "date_trunc('day', CAST({col} AS TIMESTAMP))"),
            (TimeGrain::Week, "date_trunc('week', CAST({col} AS TIMESTAMP))"),
            (TimeGrain::Month, "date_trunc('month', CAST({col} AS TIMESTAMP))"),
            (TimeGrain::Quarter, "date_trunc('quarter', CAST({col} AS TIMESTAMP))"),
            (TimeGrain::Year, "date_trunc('year', CAST({col} AS TIMESTAMP))"),
        ],
    )
    .with_type("VARBINARY", SemanticType::Raw)
}

/// The embedded in-process backend
pub fn memory() -> EngineSpec {
    with_grains(
        EngineSpec::new("memory"),
        &[
            (TimeGrain::Second, "DATE_TRUNC('second', {col})"),
            (TimeGrain::Minute, "DATE_TRUNC('minute', {col})"),
            (TimeGrain::FiveMinutes, "TIME_BUCKET('5 minutes', {col})"),
            (TimeGrain::FifteenMinutes, "TIME_BUCKET('15 minutes', {col})"),
            (TimeGrain::HalfHour, "TIME_BUCKET('30 minutes', {col})"),
            (TimeGrain::Hour, "DATE_TRUNC('hour', {col})"),
            (TimeGrain::Day, "DATE_TRUNC('day', {col})"),
            (TimeGrain::Week, "DATE_TRUNC('week', {col})"),
            (TimeGrain::Month, "DATE_TRUNC('month', {col})"),
            (TimeGrain::Quarter, "DATE_TRUNC('quarter', {col})"),
            (TimeGrain::Year, "DATE_TRUNC('year', {col})"),
        ],
    )
}

pub fn builtins() -> Vec<EngineSpec> {
    vec![sqlite(), postgres(), mysql(), mssql(), oracle(), presto(), memory()]
}
