//! SQL text to an executable select plan

use chrono::Duration;
use sqlparser::ast::{
    BinaryOperator, Distinct, Expr, FunctionArg, FunctionArgExpr, GroupByExpr, ObjectName,
    OrderByExpr, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;

use crate::data::{DataType, Value};

#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub source: Source,
    pub projections: Vec<Projection>,
    pub selection: Option<ScalarExpr>,
    pub group_by: Vec<ScalarExpr>,
    pub having: Option<ScalarExpr>,
    pub order_by: Vec<OrderKey>,
    pub distinct: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SelectPlan {
    /// Grouped when there is a GROUP BY, a HAVING or any aggregate in the output
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty()
            || self.having.is_some()
            || self.projections.iter().any(|p| match p {
                Projection::Expr { expr, .. } => expr.contains_aggregate(),
                Projection::Wildcard => false,
            })
    }
}

#[derive(Debug, Clone)]
pub enum Source {
    /// `SELECT` without `FROM`: one row, no columns
    Empty,
    Table(String),
    Derived(Box<SelectPlan>),
}

#[derive(Debug, Clone)]
pub enum Projection {
    Wildcard,
    Expr { expr: ScalarExpr, name: String },
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub target: OrderTarget,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub enum OrderTarget {
    /// 1-based output column position
    Position(usize),
    Expr(ScalarExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFn {
    Lower,
    Upper,
    Length,
    Abs,
    Coalesce,
}

#[derive(Debug, Clone)]
pub enum ScalarExpr {
    Column(String),
    Literal(Value),
    Binary {
        op: BinOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Not(Box<ScalarExpr>),
    Neg(Box<ScalarExpr>),
    IsNull {
        expr: Box<ScalarExpr>,
        negated: bool,
    },
    InList {
        expr: Box<ScalarExpr>,
        list: Vec<ScalarExpr>,
        negated: bool,
    },
    Between {
        expr: Box<ScalarExpr>,
        low: Box<ScalarExpr>,
        high: Box<ScalarExpr>,
        negated: bool,
    },
    Like {
        expr: Box<ScalarExpr>,
        pattern: Box<ScalarExpr>,
        negated: bool,
        case_insensitive: bool,
    },
    Case {
        operand: Option<Box<ScalarExpr>>,
        branches: Vec<(ScalarExpr, ScalarExpr)>,
        else_result: Option<Box<ScalarExpr>>,
    },
    Cast {
        expr: Box<ScalarExpr>,
        to: DataType,
    },
    DateTrunc {
        unit: TruncUnit,
        expr: Box<ScalarExpr>,
    },
    TimeBucket {
        interval: Duration,
        expr: Box<ScalarExpr>,
    },
    Function {
        function: ScalarFn,
        args: Vec<ScalarExpr>,
    },
    Aggregate {
        function: AggregateFunction,
        /// `None` for `COUNT(*)`
        arg: Option<Box<ScalarExpr>>,
        distinct: bool,
    },
}

impl ScalarExpr {
    pub fn contains_aggregate(&self) -> bool {
        match self {
            ScalarExpr::Aggregate { .. } => true,
            ScalarExpr::Column(_) | ScalarExpr::Literal(_) => false,
            ScalarExpr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            ScalarExpr::Not(e) | ScalarExpr::Neg(e) => e.contains_aggregate(),
            ScalarExpr::IsNull { expr, .. }
            | ScalarExpr::Cast { expr, .. }
            | ScalarExpr::DateTrunc { expr, .. }
            | ScalarExpr::TimeBucket { expr, .. } => expr.contains_aggregate(),
            ScalarExpr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(ScalarExpr::contains_aggregate)
            }
            ScalarExpr::Between { expr, low, high, .. } => {
                expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate()
            }
            ScalarExpr::Like { expr, pattern, .. } => {
                expr.contains_aggregate() || pattern.contains_aggregate()
            }
            ScalarExpr::Case {
                operand,
                branches,
                else_result,
            } => {
                operand.as_ref().map_or(false, |e| e.contains_aggregate())
                    || branches
                        .iter()
                        .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || else_result.as_ref().map_or(false, |e| e.contains_aggregate())
            }
            ScalarExpr::Function { args, .. } => args.iter().any(ScalarExpr::contains_aggregate),
        }
    }
}

/// Parse exactly one SELECT statement
pub fn parse_select(sql: &str, dialect: &dyn Dialect) -> Result<SelectPlan, ParseError> {
    let statements = Parser::parse_sql(dialect, sql)?;

    match statements.as_slice() {
        [] => Err(ParseError::EmptyQuery),
        [Statement::Query(query)] => plan_query(query),
        [_] => Err(ParseError::UnsupportedStatement),
        _ => Err(ParseError::MultipleStatements),
    }
}

fn plan_query(query: &Query) -> Result<SelectPlan, ParseError> {
    if query.with.is_some() {
        return Err(ParseError::UnsupportedQuery("WITH clauses".into()));
    }

    let mut plan = match &*query.body {
        SetExpr::Select(select) => plan_select(select)?,
        SetExpr::Query(inner) => plan_query(inner)?,
        _ => return Err(ParseError::UnsupportedQuery("only SELECT queries are supported".into())),
    };

    if !query.order_by.is_empty() {
        plan.order_by = plan_order_by(&query.order_by)?;
    }
    if let Some(limit) = &query.limit {
        let limit = parse_count(limit)?;
        plan.limit = Some(plan.limit.map_or(limit, |inner| inner.min(limit)));
    }
    if let Some(offset) = &query.offset {
        plan.offset = parse_count(&offset.value)?;
    }
    Ok(plan)
}

fn plan_select(select: &Select) -> Result<SelectPlan, ParseError> {
    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => return Err(ParseError::UnsupportedQuery("DISTINCT ON".into())),
    };

    let group_by = match &select.group_by {
        GroupByExpr::All => return Err(ParseError::UnsupportedExpression("GROUP BY ALL".into())),
        GroupByExpr::Expressions(exprs) => exprs.iter().map(plan_expr).collect::<Result<_, _>>()?,
    };

    Ok(SelectPlan {
        source: plan_from(&select.from)?,
        projections: plan_projections(&select.projection)?,
        selection: select.selection.as_ref().map(plan_expr).transpose()?,
        group_by,
        having: select.having.as_ref().map(plan_expr).transpose()?,
        order_by: Vec::new(),
        distinct,
        limit: None,
        offset: 0,
    })
}

fn plan_from(from: &[TableWithJoins]) -> Result<Source, ParseError> {
    let table = match from {
        [] => return Ok(Source::Empty),
        [table] => table,
        _ => return Err(ParseError::JoinsNotSupported),
    };
    if !table.joins.is_empty() {
        return Err(ParseError::JoinsNotSupported);
    }

    match &table.relation {
        TableFactor::Table { name, .. } => Ok(Source::Table(object_name_to_string(name))),
        TableFactor::Derived { subquery, .. } => Ok(Source::Derived(Box::new(plan_query(subquery)?))),
        _ => Err(ParseError::UnsupportedTableExpression),
    }
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
}

fn plan_projections(items: &[SelectItem]) -> Result<Vec<Projection>, ParseError> {
    items
        .iter()
        .map(|item| match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => Ok(Projection::Wildcard),
            SelectItem::UnnamedExpr(expr) => Ok(Projection::Expr {
                expr: plan_expr(expr)?,
                name: output_name(expr),
            }),
            SelectItem::ExprWithAlias { expr, alias } => Ok(Projection::Expr {
                expr: plan_expr(expr)?,
                name: alias.value.clone(),
            }),
        })
        .collect()
}

/// Column name of an unaliased projection
fn output_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

fn plan_order_by(order_by: &[OrderByExpr]) -> Result<Vec<OrderKey>, ParseError> {
    order_by
        .iter()
        .map(|item| {
            let target = match &item.expr {
                Expr::Value(SqlValue::Number(n, _)) => OrderTarget::Position(
                    n.parse().map_err(|_| ParseError::InvalidNumber(n.clone()))?,
                ),
                other => OrderTarget::Expr(plan_expr(other)?),
            };
            Ok(OrderKey {
                target,
                descending: item.asc.map(|asc| !asc).unwrap_or(false),
            })
        })
        .collect()
}

fn parse_count(expr: &Expr) -> Result<usize, ParseError> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => n.parse().map_err(|_| ParseError::InvalidLimit),
        _ => Err(ParseError::InvalidLimit),
    }
}

fn boxed(expr: &Expr) -> Result<Box<ScalarExpr>, ParseError> {
    plan_expr(expr).map(Box::new)
}

pub fn plan_expr(expr: &Expr) -> Result<ScalarExpr, ParseError> {
    match expr {
        Expr::Identifier(ident) => Ok(ScalarExpr::Column(ident.value.clone())),
        // Table qualifiers are ignored: there are no joins
        Expr::CompoundIdentifier(idents) => Ok(ScalarExpr::Column(
            idents.last().map(|i| i.value.clone()).unwrap_or_default(),
        )),
        Expr::Value(value) => Ok(ScalarExpr::Literal(sql_value_to_value(value)?)),
        Expr::TypedString { data_type, value } => {
            let to = parse_data_type(&data_type.to_string())?;
            Ok(ScalarExpr::Cast {
                expr: Box::new(ScalarExpr::Literal(Value::String(value.clone()))),
                to,
            })
        }
        Expr::Nested(inner) => plan_expr(inner),
        Expr::UnaryOp { op, expr } => match op {
            UnaryOperator::Not => Ok(ScalarExpr::Not(boxed(expr)?)),
            UnaryOperator::Minus => match plan_expr(expr)? {
                ScalarExpr::Literal(Value::Int64(i)) => Ok(ScalarExpr::Literal(Value::Int64(-i))),
                ScalarExpr::Literal(Value::Float64(f)) => Ok(ScalarExpr::Literal(Value::Float64(-f))),
                other => Ok(ScalarExpr::Neg(Box::new(other))),
            },
            UnaryOperator::Plus => plan_expr(expr),
            other => Err(ParseError::UnsupportedOperator(other.to_string())),
        },
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Eq => BinOp::Eq,
                BinaryOperator::NotEq => BinOp::NotEq,
                BinaryOperator::Lt => BinOp::Lt,
                BinaryOperator::LtEq => BinOp::LtEq,
                BinaryOperator::Gt => BinOp::Gt,
                BinaryOperator::GtEq => BinOp::GtEq,
                BinaryOperator::And => BinOp::And,
                BinaryOperator::Or => BinOp::Or,
                BinaryOperator::Plus => BinOp::Plus,
                BinaryOperator::Minus => BinOp::Minus,
                BinaryOperator::Multiply => BinOp::Multiply,
                BinaryOperator::Divide => BinOp::Divide,
                BinaryOperator::Modulo => BinOp::Modulo,
                BinaryOperator::StringConcat => BinOp::Concat,
                other => return Err(ParseError::UnsupportedOperator(other.to_string())),
            };
            Ok(ScalarExpr::Binary {
                op,
                left: boxed(left)?,
                right: boxed(right)?,
            })
        }
        Expr::IsNull(inner) => Ok(ScalarExpr::IsNull {
            expr: boxed(inner)?,
            negated: false,
        }),
        Expr::IsNotNull(inner) => Ok(ScalarExpr::IsNull {
            expr: boxed(inner)?,
            negated: true,
        }),
        Expr::InList { expr, list, negated } => Ok(ScalarExpr::InList {
            expr: boxed(expr)?,
            list: list.iter().map(plan_expr).collect::<Result<_, _>>()?,
            negated: *negated,
        }),
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(ScalarExpr::Between {
            expr: boxed(expr)?,
            low: boxed(low)?,
            high: boxed(high)?,
            negated: *negated,
        }),
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(ScalarExpr::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            negated: *negated,
            case_insensitive: false,
        }),
        Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => Ok(ScalarExpr::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            negated: *negated,
            case_insensitive: true,
        }),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => Ok(ScalarExpr::Case {
            operand: operand.as_deref().map(boxed).transpose()?,
            branches: conditions
                .iter()
                .zip(results)
                .map(|(when, then)| Ok((plan_expr(when)?, plan_expr(then)?)))
                .collect::<Result<_, ParseError>>()?,
            else_result: else_result.as_deref().map(boxed).transpose()?,
        }),
        Expr::Cast { expr, data_type, .. } => Ok(ScalarExpr::Cast {
            expr: boxed(expr)?,
            to: parse_data_type(&data_type.to_string())?,
        }),
        Expr::Function(func) => {
            let name = func.name.to_string().to_uppercase();
            plan_function(&name, &func.args, func.distinct)
        }
        other => Err(ParseError::UnsupportedExpression(other.to_string())),
    }
}

fn plan_function(name: &str, args: &[FunctionArg], distinct: bool) -> Result<ScalarExpr, ParseError> {
    let aggregate = match name {
        "COUNT" => Some(AggregateFunction::Count),
        "SUM" => Some(AggregateFunction::Sum),
        "AVG" => Some(AggregateFunction::Avg),
        "MIN" => Some(AggregateFunction::Min),
        "MAX" => Some(AggregateFunction::Max),
        _ => None,
    };
    if let Some(function) = aggregate {
        let arg = match args {
            [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] if function == AggregateFunction::Count => None,
            [single] => Some(Box::new(plan_expr(function_arg_expr(single)?)?)),
            _ => return Err(ParseError::InvalidArguments(name.to_string())),
        };
        return Ok(ScalarExpr::Aggregate {
            function,
            arg,
            distinct,
        });
    }

    let exprs = args.iter().map(function_arg_expr).collect::<Result<Vec<_>, _>>()?;
    match name {
        "DATE_TRUNC" => match exprs.as_slice() {
            [unit, column] => Ok(ScalarExpr::DateTrunc {
                unit: parse_trunc_unit(&string_literal(unit, name)?)?,
                expr: boxed(column)?,
            }),
            _ => Err(ParseError::InvalidArguments(name.to_string())),
        },
        "TIME_BUCKET" => match exprs.as_slice() {
            [interval, column] => Ok(ScalarExpr::TimeBucket {
                interval: parse_interval(&string_literal(interval, name)?)?,
                expr: boxed(column)?,
            }),
            _ => Err(ParseError::InvalidArguments(name.to_string())),
        },
        "LOWER" | "UPPER" | "LENGTH" | "ABS" | "COALESCE" => {
            let function = match name {
                "LOWER" => ScalarFn::Lower,
                "UPPER" => ScalarFn::Upper,
                "LENGTH" => ScalarFn::Length,
                "ABS" => ScalarFn::Abs,
                _ => ScalarFn::Coalesce,
            };
            let arity_ok = match function {
                ScalarFn::Coalesce => !exprs.is_empty(),
                _ => exprs.len() == 1,
            };
            if !arity_ok {
                return Err(ParseError::InvalidArguments(name.to_string()));
            }
            Ok(ScalarExpr::Function {
                function,
                args: exprs.into_iter().map(plan_expr).collect::<Result<_, _>>()?,
            })
        }
        other => Err(ParseError::UnsupportedFunction(other.to_string())),
    }
}

fn function_arg_expr(arg: &FunctionArg) -> Result<&Expr, ParseError> {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
        FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => Ok(expr),
        other => Err(ParseError::UnsupportedExpression(other.to_string())),
    }
}

fn string_literal(expr: &Expr, function: &str) -> Result<String, ParseError> {
    match expr {
        Expr::Value(SqlValue::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(ParseError::InvalidArguments(function.to_string())),
    }
}

fn parse_trunc_unit(unit: &str) -> Result<TruncUnit, ParseError> {
    match unit.trim().to_lowercase().as_str() {
        "second" => Ok(TruncUnit::Second),
        "minute" => Ok(TruncUnit::Minute),
        "hour" => Ok(TruncUnit::Hour),
        "day" => Ok(TruncUnit::Day),
        "week" => Ok(TruncUnit::Week),
        "month" => Ok(TruncUnit::Month),
        "quarter" => Ok(TruncUnit::Quarter),
        "year" => Ok(TruncUnit::Year),
        other => Err(ParseError::InvalidInterval(other.to_string())),
    }
}

/// `'5 minutes'`, `'1 hour'`, `'100 ms'`, ...
pub fn parse_interval(s: &str) -> Result<Duration, ParseError> {
    let invalid = || ParseError::InvalidInterval(s.to_string());
    let parts: Vec<&str> = s.split_whitespace().collect();
    let [value, unit] = parts.as_slice() else {
        return Err(invalid());
    };

    let value: i64 = value.parse().map_err(|_| invalid())?;
    let millis_per_unit = match unit.to_lowercase().as_str() {
        "ms" | "millisecond" | "milliseconds" => 1,
        "s" | "second" | "seconds" => 1000,
        "m" | "minute" | "minutes" => 60 * 1000,
        "h" | "hour" | "hours" => 3600 * 1000,
        "d" | "day" | "days" => 86400 * 1000,
        _ => return Err(invalid()),
    };
    value
        .checked_mul(millis_per_unit)
        .filter(|ms| *ms > 0)
        .and_then(Duration::try_milliseconds)
        .ok_or_else(invalid)
}

fn parse_data_type(name: &str) -> Result<DataType, ParseError> {
    let upper = name.to_uppercase();
    let base = upper
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    match base {
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => Ok(DataType::Bigint),
        "FLOAT" | "DOUBLE" | "REAL" | "DECIMAL" | "NUMERIC" => Ok(DataType::Double),
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" => Ok(DataType::Varchar),
        "TIMESTAMP" | "DATETIME" | "DATE" => Ok(DataType::Timestamp),
        "BOOLEAN" | "BOOL" => Ok(DataType::Boolean),
        _ => Err(ParseError::UnsupportedValue(name.to_string())),
    }
}

fn sql_value_to_value(v: &SqlValue) -> Result<Value, ParseError> {
    match v {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Int64(i))
            } else if let Ok(f) = n.parse::<f64>() {
                Ok(Value::Float64(f))
            } else {
                Err(ParseError::InvalidNumber(n.clone()))
            }
        }
        SqlValue::SingleQuotedString(s) => Ok(Value::String(s.clone())),
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(ParseError::UnsupportedValue(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    SqlParser(String),

    #[error("Empty query")]
    EmptyQuery,

    #[error("Multiple statements not supported")]
    MultipleStatements,

    #[error("Unsupported statement type")]
    UnsupportedStatement,

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("JOINs are not supported")]
    JoinsNotSupported,

    #[error("Unsupported table expression")]
    UnsupportedTableExpression,

    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid arguments to {0}")]
    InvalidArguments(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid LIMIT value")]
    InvalidLimit,
}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        ParseError::SqlParser(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::GenericDialect;

    fn parse(sql: &str) -> Result<SelectPlan, ParseError> {
        parse_select(sql, &GenericDialect {})
    }

    #[test]
    fn test_select_without_from() {
        let plan = parse("SELECT '2017-01-01T00:00:00' as test").unwrap();
        assert!(matches!(plan.source, Source::Empty));
        assert!(matches!(&plan.projections[0], Projection::Expr { name, .. } if name == "test"));
    }

    #[test]
    fn test_grouped_query() {
        let plan = parse(
            "SELECT \"name\" AS \"name\", COUNT(*) AS \"count\" FROM \"birth_names\" \
             WHERE \"ds\" >= '2017-01-01 00:00:00' GROUP BY \"name\" ORDER BY \"count\" DESC LIMIT 5",
        )
        .unwrap();
        assert!(matches!(&plan.source, Source::Table(t) if t == "birth_names"));
        assert!(plan.is_aggregate());
        assert_eq!(plan.group_by.len(), 1);
        assert!(plan.order_by[0].descending);
        assert_eq!(plan.limit, Some(5));
    }

    #[test]
    fn test_derived_table_and_outer_limit() {
        let plan = parse("SELECT * FROM (\nSELECT a FROM t LIMIT 50\n) AS inner_qry LIMIT 10").unwrap();
        let Source::Derived(inner) = &plan.source else {
            panic!("expected derived table");
        };
        assert_eq!(inner.limit, Some(50));
        assert_eq!(plan.limit, Some(10));
    }

    #[test]
    fn test_time_functions() {
        let plan = parse("SELECT DATE_TRUNC('day', ds), TIME_BUCKET('5 minutes', ds) FROM t").unwrap();
        assert!(matches!(
            &plan.projections[0],
            Projection::Expr { expr: ScalarExpr::DateTrunc { unit: TruncUnit::Day, .. }, .. }
        ));
        assert!(matches!(
            &plan.projections[1],
            Projection::Expr { expr: ScalarExpr::TimeBucket { .. }, .. }
        ));
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!(parse_interval("5 minutes").unwrap(), Duration::minutes(5));
        assert_eq!(parse_interval("1 hour").unwrap(), Duration::hours(1));
        assert_eq!(parse_interval("100 ms").unwrap(), Duration::milliseconds(100));
        assert!(parse_interval("0 ms").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            parse("SELECT * FROM a JOIN b ON a.id = b.id").unwrap_err(),
            ParseError::JoinsNotSupported
        );
        assert_eq!(parse("DELETE FROM a").unwrap_err(), ParseError::UnsupportedStatement);
        assert!(matches!(parse("SELECT ("), Err(ParseError::SqlParser(_))));
        assert!(matches!(parse("SELECT nope(a) FROM t"), Err(ParseError::UnsupportedFunction(_))));
    }
}
