//! Evaluates a [`SelectPlan`] against a [`MemoryStore`]

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use regex::Regex;
use sqlparser::dialect::Dialect;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::aggregates::create_accumulator;
use super::parser::{
    parse_select, BinOp, OrderKey, OrderTarget, ParseError, Projection, ScalarExpr, ScalarFn,
    SelectPlan, Source, TruncUnit,
};
use super::store::{MemoryStore, StoreError};
use crate::data::value::parse_timestamp_literal;
use crate::data::{DataType, Value};

/// Typed output of one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub columns: Vec<(String, DataType)>,
    pub rows: Vec<Vec<Value>>,
}

impl Relation {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Aggregate functions are not allowed here")]
    MisplacedAggregate,

    #[error("ORDER BY position {0} is not in select list")]
    InvalidOrderPosition(usize),

    #[error("{0}")]
    Type(String),
}

/// Parse and run one SELECT
pub fn execute(store: &MemoryStore, sql: &str, dialect: &dyn Dialect) -> Result<Relation, ExecuteError> {
    let plan = parse_select(sql, dialect)?;
    execute_plan(store, &plan)
}

pub fn execute_plan(store: &MemoryStore, plan: &SelectPlan) -> Result<Relation, ExecuteError> {
    let input = scan(store, &plan.source)?;
    let schema = Schema {
        columns: &input.columns,
    };
    let aggregate = plan.is_aggregate();
    let items = expand_wildcards(&plan.projections, &input.columns, aggregate)?;

    let mut rows = Vec::with_capacity(input.rows.len());
    for row in &input.rows {
        if let Some(selection) = &plan.selection {
            if !is_true(&eval(selection, &schema, Ctx::Row(row))?) {
                continue;
            }
        }
        rows.push(row.clone());
    }

    // (output values, sort keys)
    let mut output: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
    if aggregate {
        for group in group_rows(&plan.group_by, &schema, rows)? {
            let ctx = Ctx::Group(&group);
            if let Some(having) = &plan.having {
                if !is_true(&eval(having, &schema, ctx)?) {
                    continue;
                }
            }
            output.push(project(plan, &items, &schema, ctx)?);
        }
    } else {
        for row in &rows {
            output.push(project(plan, &items, &schema, Ctx::Row(row))?);
        }
    }

    if plan.distinct {
        let mut seen = HashSet::new();
        output.retain(|(values, _)| seen.insert(values.clone()));
    }

    if !plan.order_by.is_empty() {
        apply_order_by(&mut output, &plan.order_by);
    }

    let rows: Vec<Vec<Value>> = output
        .into_iter()
        .skip(plan.offset)
        .take(plan.limit.unwrap_or(usize::MAX))
        .map(|(values, _)| values)
        .collect();

    let columns = items
        .iter()
        .enumerate()
        .map(|(i, (expr, name))| {
            let declared = match expr {
                ScalarExpr::Column(column) => schema.data_type(column),
                _ => None,
            };
            let data_type = declared
                .filter(|t| *t != DataType::Null)
                .unwrap_or_else(|| {
                    rows.iter()
                        .map(|row| &row[i])
                        .find(|v| !v.is_null())
                        .map(DataType::from_value)
                        .unwrap_or(DataType::Null)
                });
            (name.clone(), data_type)
        })
        .collect();

    Ok(Relation { columns, rows })
}

fn scan(store: &MemoryStore, source: &Source) -> Result<Relation, ExecuteError> {
    match source {
        Source::Empty => Ok(Relation {
            columns: Vec::new(),
            rows: vec![Vec::new()],
        }),
        Source::Table(name) => {
            let table = store
                .get_table(name)
                .ok_or_else(|| ExecuteError::TableNotFound(name.clone()))?;
            Ok(Relation {
                columns: table.columns().to_vec(),
                rows: table.snapshot(),
            })
        }
        Source::Derived(inner) => execute_plan(store, inner),
    }
}

fn expand_wildcards(
    projections: &[Projection],
    columns: &[(String, DataType)],
    aggregate: bool,
) -> Result<Vec<(ScalarExpr, String)>, ExecuteError> {
    let mut items = Vec::new();
    for projection in projections {
        match projection {
            Projection::Wildcard if aggregate => {
                return Err(ExecuteError::Type("SELECT * is not allowed in a grouped query".into()))
            }
            Projection::Wildcard => items.extend(
                columns
                    .iter()
                    .map(|(name, _)| (ScalarExpr::Column(name.clone()), name.clone())),
            ),
            Projection::Expr { expr, name } => items.push((expr.clone(), name.clone())),
        }
    }
    Ok(items)
}

fn project(
    plan: &SelectPlan,
    items: &[(ScalarExpr, String)],
    schema: &Schema,
    ctx: Ctx,
) -> Result<(Vec<Value>, Vec<Value>), ExecuteError> {
    let values = items
        .iter()
        .map(|(expr, _)| eval(expr, schema, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let keys = sort_keys(&plan.order_by, items, &values, schema, ctx)?;
    Ok((values, keys))
}

/// Groups in first-seen order; no GROUP BY means one group, even when empty
fn group_rows(
    group_by: &[ScalarExpr],
    schema: &Schema,
    rows: Vec<Vec<Value>>,
) -> Result<Vec<Vec<Vec<Value>>>, ExecuteError> {
    if group_by.is_empty() {
        return Ok(vec![rows]);
    }

    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Vec<Value>>> = Vec::new();
    for row in rows {
        let key = compute_group_key(group_by, schema, &row)?;
        match index.get(&key) {
            Some(&i) => groups[i].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }
    Ok(groups)
}

fn compute_group_key(group_by: &[ScalarExpr], schema: &Schema, row: &[Value]) -> Result<Vec<Value>, ExecuteError> {
    group_by.iter().map(|expr| eval(expr, schema, Ctx::Row(row))).collect()
}

fn sort_keys(
    order_by: &[OrderKey],
    items: &[(ScalarExpr, String)],
    values: &[Value],
    schema: &Schema,
    ctx: Ctx,
) -> Result<Vec<Value>, ExecuteError> {
    order_by
        .iter()
        .map(|key| match &key.target {
            OrderTarget::Position(position) => position
                .checked_sub(1)
                .and_then(|i| values.get(i))
                .cloned()
                .ok_or(ExecuteError::InvalidOrderPosition(*position)),
            OrderTarget::Expr(expr) => {
                // Output aliases shadow input columns
                if let ScalarExpr::Column(name) = expr {
                    if let Some(i) = items.iter().position(|(_, output)| output == name) {
                        return Ok(values[i].clone());
                    }
                }
                eval(expr, schema, ctx)
            }
        })
        .collect()
}

fn apply_order_by(rows: &mut [(Vec<Value>, Vec<Value>)], order_by: &[OrderKey]) {
    rows.sort_by(|(_, a), (_, b)| {
        for (i, key) in order_by.iter().enumerate() {
            let cmp = a[i].cmp(&b[i]);
            if cmp != Ordering::Equal {
                return if key.descending { cmp.reverse() } else { cmp };
            }
        }
        Ordering::Equal
    });
}

struct Schema<'a> {
    columns: &'a [(String, DataType)],
}

impl Schema<'_> {
    /// Exact match first, then case-insensitive
    fn index(&self, name: &str) -> Result<usize, ExecuteError> {
        self.columns
            .iter()
            .position(|(c, _)| c == name)
            .or_else(|| self.columns.iter().position(|(c, _)| c.eq_ignore_ascii_case(name)))
            .ok_or_else(|| ExecuteError::ColumnNotFound(name.to_string()))
    }

    fn data_type(&self, name: &str) -> Option<DataType> {
        self.index(name).ok().map(|i| self.columns[i].1)
    }
}

#[derive(Clone, Copy)]
enum Ctx<'a> {
    Row(&'a [Value]),
    /// Columns read from the first row of the group
    Group(&'a [Vec<Value>]),
}

fn eval(expr: &ScalarExpr, schema: &Schema, ctx: Ctx) -> Result<Value, ExecuteError> {
    match expr {
        ScalarExpr::Column(name) => {
            let i = schema.index(name)?;
            Ok(match ctx {
                Ctx::Row(row) => row[i].clone(),
                Ctx::Group(rows) => rows.first().map(|row| row[i].clone()).unwrap_or(Value::Null),
            })
        }
        ScalarExpr::Literal(value) => Ok(value.clone()),
        ScalarExpr::Binary { op, left, right } => {
            let left = eval(left, schema, ctx)?;
            match op {
                BinOp::And => {
                    let l = truth(&left)?;
                    if l == Some(false) {
                        return Ok(Value::Bool(false));
                    }
                    let r = truth(&eval(right, schema, ctx)?)?;
                    Ok(match (l, r) {
                        (_, Some(false)) => Value::Bool(false),
                        (Some(true), Some(true)) => Value::Bool(true),
                        _ => Value::Null,
                    })
                }
                BinOp::Or => {
                    let l = truth(&left)?;
                    if l == Some(true) {
                        return Ok(Value::Bool(true));
                    }
                    let r = truth(&eval(right, schema, ctx)?)?;
                    Ok(match (l, r) {
                        (_, Some(true)) => Value::Bool(true),
                        (Some(false), Some(false)) => Value::Bool(false),
                        _ => Value::Null,
                    })
                }
                BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
                    let right = eval(right, schema, ctx)?;
                    Ok(match compare(&left, &right)? {
                        None => Value::Null,
                        Some(ord) => Value::Bool(match op {
                            BinOp::Eq => ord == Ordering::Equal,
                            BinOp::NotEq => ord != Ordering::Equal,
                            BinOp::Lt => ord == Ordering::Less,
                            BinOp::LtEq => ord != Ordering::Greater,
                            BinOp::Gt => ord == Ordering::Greater,
                            _ => ord != Ordering::Less,
                        }),
                    })
                }
                BinOp::Concat => {
                    let right = eval(right, schema, ctx)?;
                    if left.is_null() || right.is_null() {
                        return Ok(Value::Null);
                    }
                    Ok(Value::String(format!("{}{}", left.to_plain_string(), right.to_plain_string())))
                }
                arithmetic_op => arithmetic(*arithmetic_op, &left, &eval(right, schema, ctx)?),
            }
        }
        ScalarExpr::Not(inner) => Ok(match truth(&eval(inner, schema, ctx)?)? {
            Some(b) => Value::Bool(!b),
            None => Value::Null,
        }),
        ScalarExpr::Neg(inner) => match eval(inner, schema, ctx)? {
            Value::Null => Ok(Value::Null),
            Value::Int64(i) => i
                .checked_neg()
                .map(Value::Int64)
                .ok_or_else(|| ExecuteError::Type("integer overflow".into())),
            Value::Float64(f) => Ok(Value::Float64(-f)),
            other => Err(ExecuteError::Type(format!("cannot negate {}", other.type_name()))),
        },
        ScalarExpr::IsNull { expr, negated } => {
            let is_null = eval(expr, schema, ctx)?.is_null();
            Ok(Value::Bool(is_null != *negated))
        }
        ScalarExpr::InList { expr, list, negated } => {
            let value = eval(expr, schema, ctx)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                match compare(&value, &eval(item, schema, ctx)?)? {
                    Some(Ordering::Equal) => return Ok(Value::Bool(!*negated)),
                    None => saw_null = true,
                    Some(_) => {}
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                Value::Bool(*negated)
            })
        }
        ScalarExpr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = eval(expr, schema, ctx)?;
            let low = compare(&value, &eval(low, schema, ctx)?)?;
            let high = compare(&value, &eval(high, schema, ctx)?)?;
            Ok(match (low, high) {
                (Some(low), Some(high)) => {
                    let inside = low != Ordering::Less && high != Ordering::Greater;
                    Value::Bool(inside != *negated)
                }
                _ => Value::Null,
            })
        }
        ScalarExpr::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => {
            let value = eval(expr, schema, ctx)?;
            let pattern = eval(pattern, schema, ctx)?;
            match (value.as_str(), pattern.as_str()) {
                (Some(s), Some(p)) => Ok(Value::Bool(like_match(s, p, *case_insensitive)? != *negated)),
                _ if value.is_null() || pattern.is_null() => Ok(Value::Null),
                _ => Err(ExecuteError::Type(format!(
                    "LIKE expects strings, got {} and {}",
                    value.type_name(),
                    pattern.type_name()
                ))),
            }
        }
        ScalarExpr::Case {
            operand,
            branches,
            else_result,
        } => {
            let operand = operand.as_ref().map(|e| eval(e, schema, ctx)).transpose()?;
            for (when, then) in branches {
                let when = eval(when, schema, ctx)?;
                let hit = match &operand {
                    Some(operand) => compare(operand, &when)? == Some(Ordering::Equal),
                    None => is_true(&when),
                };
                if hit {
                    return eval(then, schema, ctx);
                }
            }
            match else_result {
                Some(e) => eval(e, schema, ctx),
                None => Ok(Value::Null),
            }
        }
        ScalarExpr::Cast { expr, to } => cast(eval(expr, schema, ctx)?, *to),
        ScalarExpr::DateTrunc { unit, expr } => date_trunc(*unit, eval(expr, schema, ctx)?),
        ScalarExpr::TimeBucket { interval, expr } => time_bucket(*interval, eval(expr, schema, ctx)?),
        ScalarExpr::Function { function, args } => {
            let args = args
                .iter()
                .map(|a| eval(a, schema, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            call_function(*function, args)
        }
        ScalarExpr::Aggregate {
            function,
            arg,
            distinct,
        } => {
            let Ctx::Group(rows) = ctx else {
                return Err(ExecuteError::MisplacedAggregate);
            };
            let mut accumulator = create_accumulator(*function, arg.is_none(), *distinct);
            for row in rows {
                let value = match arg {
                    Some(arg) => eval(arg, schema, Ctx::Row(row))?,
                    None => Value::Int64(1),
                };
                accumulator.accumulate(&value);
            }
            Ok(accumulator.result())
        }
    }
}

fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn truth(value: &Value) -> Result<Option<bool>, ExecuteError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(ExecuteError::Type(format!("expected boolean, got {}", other.type_name()))),
    }
}

/// SQL comparison; `None` when either side is null
fn compare(left: &Value, right: &Value) -> Result<Option<Ordering>, ExecuteError> {
    use Value::*;

    let incomparable = || {
        ExecuteError::Type(format!("cannot compare {} with {}", left.type_name(), right.type_name()))
    };
    match (left, right) {
        (Null, _) | (_, Null) => Ok(None),
        (Int64(_) | Float64(_), Int64(_) | Float64(_)) => Ok(Some(left.cmp(right))),
        (Bool(a), Bool(b)) => Ok(Some(a.cmp(b))),
        (String(a) | Raw(a), String(b) | Raw(b)) => Ok(Some(a.cmp(b))),
        (Timestamp(_) | TimestampTz(_), Timestamp(_) | TimestampTz(_)) => {
            Ok(Some(left.as_timestamp().cmp(&right.as_timestamp())))
        }
        // String literals compared against timestamps or numbers are coerced
        (Timestamp(_) | TimestampTz(_), String(s)) => {
            let parsed = parse_timestamp_literal(s).ok_or_else(incomparable)?;
            compare(left, &parsed)
        }
        (String(s), Timestamp(_) | TimestampTz(_)) => {
            let parsed = parse_timestamp_literal(s).ok_or_else(incomparable)?;
            compare(&parsed, right)
        }
        (Int64(_) | Float64(_), String(s)) => {
            let parsed = s.trim().parse::<f64>().map_err(|_| incomparable())?;
            compare(left, &Float64(parsed))
        }
        (String(s), Int64(_) | Float64(_)) => {
            let parsed = s.trim().parse::<f64>().map_err(|_| incomparable())?;
            compare(&Float64(parsed), right)
        }
        _ => Err(incomparable()),
    }
}

fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExecuteError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if let (Value::Int64(a), Value::Int64(b)) = (left, right) {
        let result = match op {
            BinOp::Plus => a.checked_add(*b),
            BinOp::Minus => a.checked_sub(*b),
            BinOp::Multiply => a.checked_mul(*b),
            BinOp::Divide | BinOp::Modulo if *b == 0 => return Ok(Value::Null),
            BinOp::Divide => a.checked_div(*b),
            BinOp::Modulo => a.checked_rem(*b),
            other => return Err(ExecuteError::Type(format!("{:?} is not an arithmetic operator", other))),
        };
        return result
            .map(Value::Int64)
            .ok_or_else(|| ExecuteError::Type("integer overflow".into()));
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ExecuteError::Type(format!(
            "cannot apply {:?} to {} and {}",
            op,
            left.type_name(),
            right.type_name()
        )));
    };
    let result = match op {
        BinOp::Plus => a + b,
        BinOp::Minus => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide | BinOp::Modulo if b == 0.0 => return Ok(Value::Null),
        BinOp::Divide => a / b,
        BinOp::Modulo => a % b,
        other => return Err(ExecuteError::Type(format!("{:?} is not an arithmetic operator", other))),
    };
    Ok(Value::Float64(result))
}

/// `%` matches any run, `_` any single character
fn like_match(s: &str, pattern: &str, case_insensitive: bool) -> Result<bool, ExecuteError> {
    let mut regex = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    regex.push('$');
    Regex::new(&regex)
        .map(|re| re.is_match(s))
        .map_err(|e| ExecuteError::Type(e.to_string()))
}

fn cast(value: Value, to: DataType) -> Result<Value, ExecuteError> {
    let fail = |v: &Value| ExecuteError::Type(format!("cannot cast {} '{}' to {}", v.type_name(), v, to));
    match (to, &value) {
        (_, Value::Null) | (DataType::Null, _) => Ok(Value::Null),
        (DataType::Boolean, Value::Bool(_)) => Ok(value),
        (DataType::Boolean, Value::Int64(i)) => Ok(Value::Bool(*i != 0)),
        (DataType::Boolean, Value::String(s) | Value::Raw(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(fail(&value)),
        },
        (DataType::Bigint, Value::Int64(_)) => Ok(value),
        (DataType::Bigint, Value::Float64(f)) => Ok(Value::Int64(f.trunc() as i64)),
        (DataType::Bigint, Value::Bool(b)) => Ok(Value::Int64(i64::from(*b))),
        (DataType::Bigint, Value::String(s) | Value::Raw(s)) => {
            s.trim().parse().map(Value::Int64).map_err(|_| fail(&value))
        }
        (DataType::Double, Value::Int64(_) | Value::Float64(_)) => {
            value.as_f64().map(Value::Float64).ok_or_else(|| fail(&value))
        }
        (DataType::Double, Value::String(s) | Value::Raw(s)) => {
            s.trim().parse().map(Value::Float64).map_err(|_| fail(&value))
        }
        (DataType::Varchar, _) => Ok(Value::String(value.to_plain_string())),
        (DataType::Timestamp, Value::Timestamp(_) | Value::TimestampTz(_)) => Ok(value),
        (DataType::Timestamp, Value::String(s) | Value::Raw(s)) => {
            parse_timestamp_literal(s).ok_or_else(|| fail(&value))
        }
        _ => Err(fail(&value)),
    }
}

fn date_trunc(unit: TruncUnit, value: Value) -> Result<Value, ExecuteError> {
    let out_of_range = || ExecuteError::Type("timestamp out of range".into());
    match value {
        Value::Null => Ok(Value::Null),
        Value::Timestamp(ts) => truncate(unit, ts).map(Value::Timestamp).ok_or_else(out_of_range),
        Value::TimestampTz(ts) => {
            let local = truncate(unit, ts.naive_local()).ok_or_else(out_of_range)?;
            ts.offset()
                .from_local_datetime(&local)
                .single()
                .map(Value::TimestampTz)
                .ok_or_else(out_of_range)
        }
        Value::String(ref s) => {
            let parsed = parse_timestamp_literal(s)
                .ok_or_else(|| ExecuteError::Type(format!("'{}' is not a timestamp", s)))?;
            date_trunc(unit, parsed)
        }
        other => Err(ExecuteError::Type(format!("DATE_TRUNC expects a timestamp, got {}", other.type_name()))),
    }
}

fn truncate(unit: TruncUnit, ts: NaiveDateTime) -> Option<NaiveDateTime> {
    let date = ts.date();
    match unit {
        TruncUnit::Second => ts.with_nanosecond(0),
        TruncUnit::Minute => date.and_hms_opt(ts.hour(), ts.minute(), 0),
        TruncUnit::Hour => date.and_hms_opt(ts.hour(), 0, 0),
        TruncUnit::Day => date.and_hms_opt(0, 0, 0),
        TruncUnit::Week => date
            .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))?
            .and_hms_opt(0, 0, 0),
        TruncUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0),
        TruncUnit::Quarter => {
            NaiveDate::from_ymd_opt(date.year(), (date.month() - 1) / 3 * 3 + 1, 1)?.and_hms_opt(0, 0, 0)
        }
        TruncUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0),
    }
}

/// Floor to a multiple of `interval` since the epoch, in UTC
fn time_bucket(interval: Duration, value: Value) -> Result<Value, ExecuteError> {
    let ts = match value {
        Value::Null => return Ok(Value::Null),
        Value::Timestamp(ts) => ts,
        Value::TimestampTz(ts) => ts.naive_utc(),
        Value::String(ref s) => parse_timestamp_literal(s)
            .and_then(|v| v.as_timestamp())
            .ok_or_else(|| ExecuteError::Type(format!("'{}' is not a timestamp", s)))?,
        other => {
            return Err(ExecuteError::Type(format!(
                "TIME_BUCKET expects a timestamp, got {}",
                other.type_name()
            )))
        }
    };
    let width = interval.num_milliseconds();
    let bucket = ts.and_utc().timestamp_millis().div_euclid(width) * width;
    DateTime::<Utc>::from_timestamp_millis(bucket)
        .map(|dt| Value::Timestamp(dt.naive_utc()))
        .ok_or_else(|| ExecuteError::Type("timestamp out of range".into()))
}

fn call_function(function: ScalarFn, args: Vec<Value>) -> Result<Value, ExecuteError> {
    let mismatch = |v: &Value| ExecuteError::Type(format!("{:?} does not accept {}", function, v.type_name()));
    if function == ScalarFn::Coalesce {
        return Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null));
    }

    let arg = args.into_iter().next().unwrap_or(Value::Null);
    match (function, &arg) {
        (_, Value::Null) => Ok(Value::Null),
        (ScalarFn::Lower, Value::String(s) | Value::Raw(s)) => Ok(Value::String(s.to_lowercase())),
        (ScalarFn::Upper, Value::String(s) | Value::Raw(s)) => Ok(Value::String(s.to_uppercase())),
        (ScalarFn::Length, Value::String(s) | Value::Raw(s)) => Ok(Value::Int64(s.chars().count() as i64)),
        (ScalarFn::Abs, Value::Int64(i)) => i
            .checked_abs()
            .map(Value::Int64)
            .ok_or_else(|| ExecuteError::Type("integer overflow".into())),
        (ScalarFn::Abs, Value::Float64(f)) => Ok(Value::Float64(f.abs())),
        _ => Err(mismatch(&arg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::value::parse_naive_timestamp;
    use sqlparser::dialect::GenericDialect;

    fn ts(s: &str) -> Value {
        Value::Timestamp(parse_naive_timestamp(s).unwrap())
    }

    fn setup_test_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(
                "birth_names",
                vec![
                    ("ds".into(), DataType::Timestamp),
                    ("gender".into(), DataType::Varchar),
                    ("name".into(), DataType::Varchar),
                    ("num".into(), DataType::Bigint),
                ],
            )
            .unwrap();
        let rows = [
            ("2017-01-01 00:00:00", "girl", "Amy", 10),
            ("2017-01-01 06:00:00", "boy", "Aaron", 20),
            ("2017-01-02 00:00:00", "girl", "Amy", 5),
            ("2017-01-03 12:30:00", "boy", "Bob", 7),
            ("2017-02-15 00:00:00", "girl", "Cara", 1),
        ];
        for (ds, gender, name, num) in rows {
            store
                .insert(
                    "birth_names",
                    vec![ts(ds), Value::String(gender.into()), Value::String(name.into()), Value::Int64(num)],
                )
                .unwrap();
        }
        store
    }

    fn run(sql: &str) -> Result<Relation, ExecuteError> {
        execute(&setup_test_store(), sql, &GenericDialect {})
    }

    fn column(relation: &Relation, i: usize) -> Vec<Value> {
        relation.rows.iter().map(|row| row[i].clone()).collect()
    }

    #[test]
    fn test_simple_select() {
        let result = run("SELECT * FROM birth_names LIMIT 2").unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns[0], ("ds".to_string(), DataType::Timestamp));
        assert_eq!(result.columns.len(), 4);
    }

    #[test]
    fn test_group_by_with_order_and_limit() {
        let result = run(
            "SELECT \"name\" AS \"name\", SUM(\"num\") AS \"sum__num\" FROM \"birth_names\" \
             GROUP BY \"name\" ORDER BY \"sum__num\" DESC LIMIT 2",
        )
        .unwrap();
        assert_eq!(column(&result, 0), vec![Value::String("Aaron".into()), Value::String("Amy".into())]);
        assert_eq!(column(&result, 1), vec![Value::Int64(20), Value::Int64(15)]);
        assert_eq!(result.columns[1], ("sum__num".to_string(), DataType::Bigint));
    }

    #[test]
    fn test_time_filter_coerces_string_literals() {
        let result = run(
            "SELECT COUNT(*) AS c FROM birth_names \
             WHERE ds >= '2017-01-01 00:00:00' AND ds < '2017-01-02 00:00:00'",
        )
        .unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int64(2)]]);
    }

    #[test]
    fn test_aggregate_over_no_rows_yields_one_row() {
        let result = run("SELECT COUNT(*) AS c, SUM(num) AS s FROM birth_names WHERE name = 'nobody'").unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int64(0), Value::Null]]);
    }

    #[test]
    fn test_derived_table() {
        let result = run(
            "SELECT gender, COUNT(*) AS c FROM (\nSELECT * FROM birth_names WHERE num > 5\n) AS expr_qry \
             GROUP BY gender ORDER BY gender",
        )
        .unwrap();
        assert_eq!(
            result.rows,
            vec![
                vec![Value::String("boy".into()), Value::Int64(2)],
                vec![Value::String("girl".into()), Value::Int64(1)],
            ]
        );
    }

    #[test]
    fn test_select_without_from() {
        let result = execute(&MemoryStore::new(), "SELECT '2017-01-01T00:00:00' AS test", &GenericDialect {}).unwrap();
        assert_eq!(result.rows, vec![vec![Value::String("2017-01-01T00:00:00".into())]]);
        assert_eq!(result.columns, vec![("test".to_string(), DataType::Varchar)]);
    }

    #[test]
    fn test_time_grains() {
        let result = run(
            "SELECT DATE_TRUNC('month', ds) AS __timestamp, SUM(num) AS s FROM birth_names \
             GROUP BY DATE_TRUNC('month', ds) ORDER BY 1",
        )
        .unwrap();
        assert_eq!(column(&result, 0), vec![ts("2017-01-01"), ts("2017-02-01")]);
        assert_eq!(column(&result, 1), vec![Value::Int64(42), Value::Int64(1)]);

        let result = run("SELECT TIME_BUCKET('1 day', ds) AS b FROM birth_names WHERE name = 'Bob'").unwrap();
        assert_eq!(result.rows, vec![vec![ts("2017-01-03")]]);

        let result = run("SELECT DATE_TRUNC('week', ds) AS w FROM birth_names WHERE name = 'Cara'").unwrap();
        assert_eq!(result.rows, vec![vec![ts("2017-02-13")]]);
    }

    #[test]
    fn test_predicates() {
        let names = |sql: &str| column(&run(sql).unwrap(), 0);
        assert_eq!(
            names("SELECT DISTINCT name FROM birth_names WHERE name LIKE 'A%' ORDER BY name"),
            vec![Value::String("Aaron".into()), Value::String("Amy".into())]
        );
        assert_eq!(
            names("SELECT name FROM birth_names WHERE name ILIKE 'b_b'"),
            vec![Value::String("Bob".into())]
        );
        assert_eq!(
            names("SELECT name FROM birth_names WHERE num BETWEEN 6 AND 10 AND name NOT IN ('Amy')"),
            vec![Value::String("Bob".into())]
        );
        assert_eq!(
            names("SELECT CASE WHEN num > 9 THEN 'big' ELSE 'small' END FROM birth_names LIMIT 2 OFFSET 1"),
            vec![Value::String("big".into()), Value::String("small".into())]
        );
    }

    #[test]
    fn test_null_semantics() {
        let result = execute(
            &MemoryStore::new(),
            "SELECT NULL = NULL AS a, NULL OR TRUE AS b, NULL AND FALSE AS c, 1 / 0 AS d, COALESCE(NULL, 3) AS e",
            &GenericDialect {},
        )
        .unwrap();
        assert_eq!(
            result.rows[0],
            vec![Value::Null, Value::Bool(true), Value::Bool(false), Value::Null, Value::Int64(3)]
        );
        assert_eq!(result.columns[0].1, DataType::Null);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            run("SELECT nope FROM birth_names").unwrap_err(),
            ExecuteError::ColumnNotFound("nope".into())
        );
        assert_eq!(
            run("SELECT * FROM missing").unwrap_err(),
            ExecuteError::TableNotFound("missing".into())
        );
        assert_eq!(
            run("SELECT name FROM birth_names WHERE SUM(num) > 1").unwrap_err(),
            ExecuteError::MisplacedAggregate
        );
        assert!(matches!(run("SELECT name FROM birth_names WHERE num > 'abc'"), Err(ExecuteError::Type(_))));
        assert!(matches!(run("SELECT ("), Err(ExecuteError::Parse(_))));
    }

    #[test]
    fn test_like_escapes_regex_characters() {
        assert!(like_match("a.b", "a.b", false).unwrap());
        assert!(!like_match("axb", "a.b", false).unwrap());
        assert!(like_match("50% off", "50%", false).unwrap());
        assert!(like_match("ABC", "a%", true).unwrap());
    }
}
