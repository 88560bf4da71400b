//! Structured query requests and their SQL rendering

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

use super::catalog::Datasource;
use super::sql::{quote_literal, strip_comments, SqlError};
use super::time_range::{resolve_time_range, TimeBounds, TimeRangeError};
use crate::data::value::{parse_timestamp_literal, Value};
use crate::engine::{EngineError, EngineSpec, TimeGrain};
use crate::template::{TemplateContext, TemplateError, TemplateProcessor, TemplateValue};

/// Output column holding the truncated timestamp of time-series queries
pub const TIMESTAMP_LABEL: &str = "__timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceKind {
    Table,
    Druid,
}

impl std::fmt::Display for DatasourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasourceKind::Table => write!(f, "table"),
            DatasourceKind::Druid => write!(f, "druid"),
        }
    }
}

/// Datasource id plus type; serialized as `"<id>__<type>"` or `{"id", "type"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasourceRef {
    pub id: i64,
    pub kind: DatasourceKind,
}

impl DatasourceRef {
    pub fn table(id: i64) -> Self {
        Self {
            id,
            kind: DatasourceKind::Table,
        }
    }
}

impl std::fmt::Display for DatasourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}__{}", self.id, self.kind)
    }
}

impl FromStr for DatasourceRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, kind) = s
            .split_once("__")
            .ok_or_else(|| format!("invalid datasource reference '{}'", s))?;
        let id = id
            .parse::<i64>()
            .map_err(|_| format!("invalid datasource id '{}'", id))?;
        let kind = match kind {
            "table" => DatasourceKind::Table,
            "druid" => DatasourceKind::Druid,
            other => return Err(format!("unknown datasource type '{}'", other)),
        };
        Ok(Self { id, kind })
    }
}

impl Serialize for DatasourceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DatasourceRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Uid(String),
            Object {
                id: i64,
                #[serde(rename = "type", default = "default_kind")]
                kind: DatasourceKind,
            },
        }

        fn default_kind() -> DatasourceKind {
            DatasourceKind::Table
        }

        match Repr::deserialize(deserializer)? {
            Repr::Uid(uid) => uid.parse().map_err(serde::de::Error::custom),
            Repr::Object { id, kind } => Ok(DatasourceRef { id, kind }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==", alias = "=", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "<>", alias = "neq")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "in", alias = "IN")]
    In,
    #[serde(rename = "not in", alias = "NOT IN")]
    NotIn,
    #[serde(rename = "LIKE", alias = "like")]
    Like,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub col: String,
    pub op: FilterOp,
    #[serde(default)]
    pub val: serde_json::Value,
}

impl Filter {
    pub fn new(col: impl Into<String>, op: FilterOp, val: serde_json::Value) -> Self {
        Self {
            col: col.into(),
            op,
            val,
        }
    }
}

/// Saved metric by name, or an ad-hoc aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Named(String),
    Adhoc {
        label: String,
        #[serde(default, rename = "sqlExpression", alias = "sql")]
        sql: Option<String>,
        #[serde(default)]
        aggregate: Option<String>,
        #[serde(default)]
        column: Option<String>,
    },
}

impl Metric {
    pub fn label(&self) -> &str {
        match self {
            Metric::Named(name) => name,
            Metric::Adhoc { label, .. } => label,
        }
    }
}

fn default_order_desc() -> bool {
    true
}

/// A structured analytics request
///
/// Deserializes from the chart form-data shape:
/// `{"granularity": "ds", "groupby": ["name"], "metrics": ["sum__num"],
///   "filters": [], "time_range": "2017-01-01 : 2017-01-02", "limit": 100}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryObject {
    pub datasource: DatasourceRef,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default, alias = "time_grain_sqla")]
    pub time_grain: Option<TimeGrain>,
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// Raw columns for non-aggregated queries
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, alias = "limit")]
    pub row_limit: Option<usize>,
    #[serde(default = "default_order_desc")]
    pub order_desc: bool,
    /// Adds the truncated time column to the output and grouping
    #[serde(default)]
    pub is_timeseries: bool,
    /// `where`, `having`, `time_grain_sqla`, `template_params`, ...
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl QueryObject {
    pub fn new(datasource: DatasourceRef) -> Self {
        Self {
            datasource,
            granularity: None,
            time_grain: None,
            time_range: None,
            groupby: Vec::new(),
            metrics: Vec::new(),
            columns: Vec::new(),
            filters: Vec::new(),
            row_limit: None,
            order_desc: true,
            is_timeseries: false,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_granularity(mut self, column: impl Into<String>) -> Self {
        self.granularity = Some(column.into());
        self
    }

    pub fn with_time_range(mut self, range: impl Into<String>) -> Self {
        self.time_range = Some(range.into());
        self
    }

    pub fn with_groupby<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.groupby = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metrics<S: Into<String>>(mut self, metrics: impl IntoIterator<Item = S>) -> Self {
        self.metrics = metrics.into_iter().map(|m| Metric::Named(m.into())).collect();
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = Some(limit);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Grain from the field, falling back to `extras.time_grain_sqla`
    pub fn effective_time_grain(&self) -> Result<Option<TimeGrain>, RenderError> {
        if self.time_grain.is_some() {
            return Ok(self.time_grain);
        }
        self.extra_str("time_grain_sqla")
            .map(|g| g.parse::<TimeGrain>().map_err(RenderError::InvalidTimeGrain))
            .transpose()
    }

    /// `extras.template_params`, given either as an object or a JSON string
    pub fn template_params(&self) -> Result<BTreeMap<String, serde_json::Value>, RenderError> {
        match self.extras.get("template_params") {
            None | Some(serde_json::Value::Null) => Ok(BTreeMap::new()),
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(BTreeMap::new()),
            Some(serde_json::Value::String(s)) => serde_json::from_str(s)
                .map_err(|e| RenderError::InvalidTemplateParams(e.to_string())),
            Some(serde_json::Value::Object(map)) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            Some(other) => Err(RenderError::InvalidTemplateParams(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Metric '{0}' does not exist")]
    UnknownMetric(String),

    #[error("Column '{0}' does not exist")]
    UnknownColumn(String),

    #[error("Invalid time grain: {0}")]
    InvalidTimeGrain(String),

    #[error(transparent)]
    TimeRange(#[from] TimeRangeError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("Filter on '{column}' needs {expected}")]
    InvalidFilterValue { column: String, expected: &'static str },

    #[error("Invalid template parameters: {0}")]
    InvalidTemplateParams(String),

    #[error("Ad-hoc metric '{0}' needs either SQL or an aggregate and column")]
    InvalidAdhocMetric(String),

    #[error("Query selects no columns")]
    EmptyProjection,
}

/// Everything rendering needs besides the query itself
pub struct RenderContext<'a> {
    pub datasource: &'a Datasource,
    pub spec: &'a EngineSpec,
    pub templates: &'a TemplateProcessor,
    pub template_context: &'a TemplateContext,
    pub now: NaiveDateTime,
    pub default_row_limit: usize,
    pub sql_max_row: usize,
}

/// Output of rendering: final SQL plus the resolved inputs that identify it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedQuery {
    pub datasource_uid: String,
    pub dialect: String,
    pub sql: String,
    pub groupby: Vec<String>,
    pub metrics: Vec<String>,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub granularity: Option<String>,
    pub time_grain: Option<TimeGrain>,
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    pub row_limit: Option<usize>,
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl RenderedQuery {
    /// Ad-hoc SQL has no structured parts; only the SQL and target identify it
    pub fn from_sql(datasource_uid: impl Into<String>, dialect: impl Into<String>, sql: impl Into<String>, row_limit: Option<usize>) -> Self {
        Self {
            datasource_uid: datasource_uid.into(),
            dialect: dialect.into(),
            sql: sql.into(),
            groupby: Vec::new(),
            metrics: Vec::new(),
            columns: Vec::new(),
            filters: Vec::new(),
            granularity: None,
            time_grain: None,
            since: None,
            until: None,
            row_limit,
            extras: BTreeMap::new(),
        }
    }
}

impl QueryObject {
    /// Render to SQL; the object itself is left untouched
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<RenderedQuery, RenderError> {
        let spec = ctx.spec;
        let ds = ctx.datasource;

        let mut template_context = ctx.template_context.clone();
        for (name, value) in self.template_params()? {
            template_context
                .bindings
                .entry(name)
                .or_insert_with(|| TemplateValue::from_json(&value));
        }
        let template = |sql: &str| ctx.templates.process(sql, &template_context);

        let time_grain = self.effective_time_grain()?;
        let bounds = match &self.time_range {
            Some(range) => resolve_time_range(range, ctx.now)?,
            None => TimeBounds::default(),
        };

        let mut select: Vec<String> = Vec::new();
        let mut group_by: Vec<String> = Vec::new();

        if self.is_timeseries {
            if let Some(granularity) = &self.granularity {
                let expr = spec
                    .time_grain_expression(time_grain, granularity)
                    .ok_or_else(|| EngineError::UnsupportedGrain {
                        dialect: spec.id.clone(),
                        grain: time_grain.unwrap_or(TimeGrain::Day),
                    })?;
                select.push(format!("{} AS {}", expr, spec.quote_identifier(TIMESTAMP_LABEL)));
                group_by.push(expr);
            }
        }

        for column in &self.groupby {
            let expr = self.column_expression(column, ds, spec)?;
            select.push(format!("{} AS {}", expr, spec.quote_identifier(column)));
            group_by.push(expr);
        }

        let mut metric_exprs = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            let expr = self.metric_expression(metric, ds, spec)?;
            select.push(format!("{} AS {}", expr, spec.quote_identifier(metric.label())));
            metric_exprs.push(expr);
        }

        if self.metrics.is_empty() {
            for column in &self.columns {
                let expr = self.column_expression(column, ds, spec)?;
                select.push(format!("{} AS {}", expr, spec.quote_identifier(column)));
            }
            // Raw records are not aggregated
            group_by.clear();
        }

        if select.is_empty() {
            return Err(RenderError::EmptyProjection);
        }

        let from = match &ds.sql {
            Some(sql) => {
                let body = strip_comments(&template(sql)?, spec.sql_dialect().as_ref())?;
                format!("(\n{}\n) AS {}", body, spec.quote_identifier("expr_qry"))
            }
            None => spec.quote_table(&ds.full_table_name()),
        };

        let mut conditions: Vec<String> = Vec::new();
        if let Some(granularity) = &self.granularity {
            let column = self.column_expression(granularity, ds, spec)?;
            if let Some(since) = bounds.since {
                conditions.push(format!("{} >= {}", column, spec.datetime_literal(&since)));
            }
            if let Some(until) = bounds.until {
                conditions.push(format!("{} < {}", column, spec.datetime_literal(&until)));
            }
        }
        for filter in &self.filters {
            conditions.push(self.filter_condition(filter, ds, spec)?);
        }
        if let Some(clause) = self.extra_str("where") {
            conditions.push(format!("({})", template(clause)?));
        }

        let mut sql = format!("SELECT {}\nFROM {}", select.join(",\n       "), from);
        if !conditions.is_empty() {
            sql.push_str(&format!("\nWHERE {}", conditions.join("\n  AND ")));
        }
        if !group_by.is_empty() {
            sql.push_str(&format!("\nGROUP BY {}", group_by.join(", ")));
        }
        if let Some(clause) = self.extra_str("having") {
            if !self.metrics.is_empty() {
                sql.push_str(&format!("\nHAVING ({})", template(clause)?));
            }
        }
        if let Some(first) = self.metrics.first() {
            let direction = if self.order_desc { "DESC" } else { "ASC" };
            sql.push_str(&format!("\nORDER BY {} {}", spec.quote_identifier(first.label()), direction));
        }

        let row_limit = self.row_limit.unwrap_or(ctx.default_row_limit).min(ctx.sql_max_row);
        sql = spec.apply_row_limit(&sql, row_limit);

        Ok(RenderedQuery {
            datasource_uid: ds.uid(),
            dialect: spec.id.clone(),
            sql,
            groupby: self.groupby.clone(),
            metrics: self.metrics.iter().map(|m| m.label().to_string()).collect(),
            columns: self.columns.clone(),
            filters: self.filters.clone(),
            granularity: self.granularity.clone(),
            time_grain,
            since: bounds.since,
            until: bounds.until,
            row_limit: Some(row_limit),
            extras: self.extras.clone(),
        })
    }

    fn column_expression(&self, name: &str, ds: &Datasource, spec: &EngineSpec) -> Result<String, RenderError> {
        match ds.column(name) {
            Some(column) => Ok(column
                .expression
                .clone()
                .unwrap_or_else(|| spec.quote_identifier(name))),
            // Datasources without column metadata defer to the backend
            None if ds.columns.is_empty() => Ok(spec.quote_identifier(name)),
            None => Err(RenderError::UnknownColumn(name.to_string())),
        }
    }

    fn metric_expression(&self, metric: &Metric, ds: &Datasource, spec: &EngineSpec) -> Result<String, RenderError> {
        match metric {
            Metric::Named(name) => match ds.metric(name) {
                Some(def) => Ok(def.expression.clone()),
                None if name == "count" => Ok("COUNT(*)".to_string()),
                None => Err(RenderError::UnknownMetric(name.clone())),
            },
            Metric::Adhoc {
                label,
                sql,
                aggregate,
                column,
            } => match (sql, aggregate, column) {
                (Some(sql), _, _) if !sql.trim().is_empty() => Ok(sql.clone()),
                (_, Some(aggregate), Some(column)) => {
                    let function = aggregate.trim().to_uppercase();
                    if !function.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
                        return Err(RenderError::InvalidAdhocMetric(label.clone()));
                    }
                    let column = self.column_expression(column, ds, spec)?;
                    if function == "COUNT_DISTINCT" {
                        Ok(format!("COUNT(DISTINCT {})", column))
                    } else {
                        Ok(format!("{}({})", function, column))
                    }
                }
                _ => Err(RenderError::InvalidAdhocMetric(label.clone())),
            },
        }
    }

    fn filter_condition(&self, filter: &Filter, ds: &Datasource, spec: &EngineSpec) -> Result<String, RenderError> {
        let column = self.column_expression(&filter.col, ds, spec)?;
        let temporal = ds.column(&filter.col).map_or(false, |c| c.is_dttm);
        let literal = |value: &serde_json::Value| sql_literal(value, temporal, spec);
        let scalar = || -> Result<String, RenderError> {
            let value = match &filter.val {
                serde_json::Value::Array(items) if items.len() == 1 => &items[0],
                serde_json::Value::Array(_) => {
                    return Err(RenderError::InvalidFilterValue {
                        column: filter.col.clone(),
                        expected: "a single value",
                    })
                }
                other => other,
            };
            Ok(literal(value))
        };

        let condition = match filter.op {
            FilterOp::Eq => format!("{} = {}", column, scalar()?),
            FilterOp::NotEq => format!("{} != {}", column, scalar()?),
            FilterOp::Gt => format!("{} > {}", column, scalar()?),
            FilterOp::GtEq => format!("{} >= {}", column, scalar()?),
            FilterOp::Lt => format!("{} < {}", column, scalar()?),
            FilterOp::LtEq => format!("{} <= {}", column, scalar()?),
            FilterOp::Like => format!("{} LIKE {}", column, scalar()?),
            FilterOp::IsNull => format!("{} IS NULL", column),
            FilterOp::IsNotNull => format!("{} IS NOT NULL", column),
            FilterOp::In | FilterOp::NotIn => {
                let values: Vec<String> = match &filter.val {
                    serde_json::Value::Array(items) => items.iter().map(literal).collect(),
                    serde_json::Value::Null => Vec::new(),
                    other => vec![literal(other)],
                };
                let negated = filter.op == FilterOp::NotIn;
                if values.is_empty() {
                    // Empty IN matches nothing; empty NOT IN matches everything
                    if negated { "1 = 1".to_string() } else { "1 = 0".to_string() }
                } else {
                    let keyword = if negated { "NOT IN" } else { "IN" };
                    format!("{} {} ({})", column, keyword, values.join(", "))
                }
            }
        };
        Ok(condition)
    }
}

fn sql_literal(value: &serde_json::Value, temporal: bool, spec: &EngineSpec) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(true) => "TRUE".to_string(),
        serde_json::Value::Bool(false) => "FALSE".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => {
            if temporal {
                match parse_timestamp_literal(s) {
                    Some(Value::Timestamp(ts)) => return spec.datetime_literal(&ts),
                    Some(Value::TimestampTz(ts)) => return spec.datetime_literal(&ts.naive_utc()),
                    _ => {}
                }
            }
            quote_literal(s)
        }
        other => quote_literal(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::value::parse_naive_timestamp;
    use crate::engine::EngineSpecRegistry;
    use crate::query::catalog::{ColumnDef, MetricDef};

    fn birth_names() -> Datasource {
        Datasource::new(3, 1, "birth_names")
            .with_columns(vec![
                ColumnDef::temporal("ds"),
                ColumnDef::new("name"),
                ColumnDef::new("gender"),
                ColumnDef::new("num"),
            ])
            .with_metrics(vec![MetricDef::new("sum__num", "SUM(\"num\")")])
    }

    fn render(object: &QueryObject, dialect: &str) -> Result<RenderedQuery, RenderError> {
        let spec = EngineSpecRegistry::new().resolve(dialect).unwrap();
        let ds = birth_names();
        let templates = TemplateProcessor::new();
        let template_context = TemplateContext::new();
        object.render(&RenderContext {
            datasource: &ds,
            spec: &spec,
            templates: &templates,
            template_context: &template_context,
            now: parse_naive_timestamp("2017-06-01 00:00:00").unwrap(),
            default_row_limit: 10_000,
            sql_max_row: 100_000,
        })
    }

    #[test]
    fn test_deserialize_form_data() {
        let object: QueryObject = serde_json::from_value(serde_json::json!({
            "datasource": {"id": 3, "type": "table"},
            "granularity": "ds",
            "groupby": ["name"],
            "metrics": ["sum__num"],
            "filters": [{"col": "gender", "op": "in", "val": ["girl"]}],
            "time_range": "2017-01-01 : 2017-01-02",
            "limit": 100
        }))
        .unwrap();
        assert_eq!(object.datasource, DatasourceRef::table(3));
        assert_eq!(object.row_limit, Some(100));
        assert_eq!(object.filters[0].op, FilterOp::In);
        assert!(object.order_desc);

        let by_uid: QueryObject =
            serde_json::from_value(serde_json::json!({"datasource": "3__table"})).unwrap();
        assert_eq!(by_uid.datasource, DatasourceRef::table(3));
    }

    #[test]
    fn test_render_group_by_query() {
        let object = QueryObject::new(DatasourceRef::table(3))
            .with_granularity("ds")
            .with_time_range("2017-01-01 : 2017-01-02")
            .with_groupby(["name"])
            .with_metrics(["sum__num"])
            .with_filter(Filter::new("gender", FilterOp::In, serde_json::json!(["girl", "O'Neil"])))
            .with_row_limit(100);

        let rendered = render(&object, "sqlite").unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT \"name\" AS \"name\",\n       SUM(\"num\") AS \"sum__num\"\n\
             FROM \"birth_names\"\n\
             WHERE \"ds\" >= '2017-01-01 00:00:00'\n  AND \"ds\" < '2017-01-02 00:00:00'\n  \
             AND \"gender\" IN ('girl', 'O''Neil')\n\
             GROUP BY \"name\"\n\
             ORDER BY \"sum__num\" DESC\n\
             LIMIT 100"
        );
        assert_eq!(rendered.datasource_uid, "3__table");
        assert_eq!(rendered.since, parse_naive_timestamp("2017-01-01 00:00:00"));
    }

    #[test]
    fn test_render_leaves_object_untouched() {
        let object = QueryObject::new(DatasourceRef::table(3)).with_metrics(["count"]);
        let before = object.clone();
        render(&object, "postgres").unwrap();
        assert_eq!(object, before);
    }

    #[test]
    fn test_timeseries_uses_grain_and_dialect_literals() {
        let mut object = QueryObject::new(DatasourceRef::table(3))
            .with_granularity("ds")
            .with_time_range("2017-01-01 : 2017-02-01")
            .with_metrics(["count"])
            .with_extra("time_grain_sqla", serde_json::json!("P1D"));
        object.is_timeseries = true;

        let rendered = render(&object, "mssql").unwrap();
        assert!(rendered.sql.starts_with("SELECT TOP 10000 DATEADD(day, DATEDIFF(day, 0, [ds]), 0) AS [__timestamp]"));
        assert!(rendered.sql.contains("[ds] >= CONVERT(DATETIME, '2017-01-01T00:00:00', 126)"));
        assert_eq!(rendered.time_grain, Some(TimeGrain::Day));
    }

    #[test]
    fn test_unknown_metric_and_column() {
        let object = QueryObject::new(DatasourceRef::table(3)).with_metrics(["avg__nope"]);
        assert_eq!(
            render(&object, "sqlite").unwrap_err(),
            RenderError::UnknownMetric("avg__nope".into())
        );

        let object = QueryObject::new(DatasourceRef::table(3))
            .with_groupby(["N/A"])
            .with_metrics(["count"]);
        assert_eq!(
            render(&object, "sqlite").unwrap_err(),
            RenderError::UnknownColumn("N/A".into())
        );
    }

    #[test]
    fn test_templated_where_clause() {
        let object = QueryObject::new(DatasourceRef::table(3))
            .with_metrics(["count"])
            .with_extra("where", serde_json::json!("name = '{{ who }}'"))
            .with_extra("template_params", serde_json::json!("{\"who\": \"Aaron\"}"));
        let rendered = render(&object, "sqlite").unwrap();
        assert!(rendered.sql.contains("WHERE (name = 'Aaron')"));
    }

    #[test]
    fn test_adhoc_metric() {
        let object: QueryObject = serde_json::from_value(serde_json::json!({
            "datasource": "3__table",
            "metrics": [{"label": "max_num", "aggregate": "MAX", "column": "num"}]
        }))
        .unwrap();
        let rendered = render(&object, "postgres").unwrap();
        assert!(rendered.sql.starts_with("SELECT MAX(\"num\") AS \"max_num\""));

        let bad: QueryObject = serde_json::from_value(serde_json::json!({
            "datasource": "3__table",
            "metrics": [{"label": "x", "aggregate": "MAX(1); DROP", "column": "num"}]
        }))
        .unwrap();
        assert!(matches!(render(&bad, "postgres"), Err(RenderError::InvalidAdhocMetric(_))));
    }

    #[test]
    fn test_bad_time_range() {
        let object = QueryObject::new(DatasourceRef::table(3))
            .with_granularity("ds")
            .with_time_range("2017-02-01 : 2017-01-01")
            .with_metrics(["count"]);
        assert!(matches!(render(&object, "sqlite"), Err(RenderError::TimeRange(_))));
    }
}
