use chrono::format::{Item, StrftimeItems};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::HashMap;

use super::lexer::{tokenize, Token};
use super::{TemplateContext, TemplateError, TemplateValue};
use crate::data::value::format_naive;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(TemplateValue),
    Name(String),
    List(Vec<Expr>),
    Call {
        function: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Method {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Neg(Box<Expr>),
}

const FUNCTIONS: &[&str] = &[
    "datetime",
    "date",
    "timedelta",
    "now",
    "utcnow",
    "today",
    "current_user_id",
    "current_username",
    "url_param",
    "filter_values",
];

/// Names visible to an expression
pub(crate) struct Scope<'a> {
    context: &'a TemplateContext,
    bindings: &'a HashMap<String, TemplateValue>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(context: &'a TemplateContext, bindings: &'a HashMap<String, TemplateValue>) -> Self {
        Self { context, bindings }
    }

    fn now(&self) -> NaiveDateTime {
        self.context.now.unwrap_or_else(|| Local::now().naive_local())
    }

    fn utcnow(&self) -> NaiveDateTime {
        self.context.now.unwrap_or_else(|| Utc::now().naive_utc())
    }
}

/// Deepest expression tree the parser will build; evaluation recurses once per level
const MAX_DEPTH: usize = 64;

pub(crate) fn evaluate(source: &str, offset: usize, scope: &Scope<'_>) -> Result<TemplateValue, TemplateError> {
    let tokens = tokenize(source, offset)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: offset + source.len(),
        depth: 0,
    };
    let expr = parser.expression()?;
    if let Some((token, at)) = parser.tokens.get(parser.pos) {
        return Err(TemplateError::syntax(*at, format!("unexpected token {:?}", token)));
    }
    eval(&expr, scope)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    /// Offset reported for errors at end of input
    end: usize,
    /// Tree depth of the node being parsed
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), TemplateError> {
        let offset = self.offset();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(TemplateError::syntax(
                offset,
                format!("expected {:?}, found {:?}", expected, token),
            )),
            None => Err(TemplateError::syntax(offset, format!("expected {:?}", expected))),
        }
    }

    fn descend(&mut self) -> Result<(), TemplateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(TemplateError::syntax(self.offset(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, TemplateError> {
        let base = self.depth;
        self.descend()?;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            // each operator adds a level to the left-leaning tree
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, TemplateError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, TemplateError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            self.descend()?;
            let offset = self.offset();
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                _ => return Err(TemplateError::syntax(offset, "expected attribute name")),
            };
            if name.starts_with('_') {
                return Err(TemplateError::Disallowed(format!("attribute '{}'", name)));
            }
            if self.peek() != Some(&Token::LParen) {
                return Err(TemplateError::Disallowed(format!("attribute access '{}'", name)));
            }
            let (args, kwargs) = self.arguments()?;
            expr = Expr::Method {
                target: Box::new(expr),
                method: name,
                args,
                kwargs,
            };
        }
        self.depth = base;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, TemplateError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Int(i)) => Ok(Expr::Literal(TemplateValue::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(TemplateValue::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(TemplateValue::Str(s))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            if self.peek() == Some(&Token::RBracket) {
                                break;
                            }
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => {
                match name.as_str() {
                    "True" | "true" => return Ok(Expr::Literal(TemplateValue::Bool(true))),
                    "False" | "false" => return Ok(Expr::Literal(TemplateValue::Bool(false))),
                    "None" | "none" => return Ok(Expr::Literal(TemplateValue::None)),
                    _ => {}
                }
                if name.starts_with('_') {
                    return Err(TemplateError::Disallowed(format!("name '{}'", name)));
                }
                if self.peek() == Some(&Token::LParen) {
                    let (args, kwargs) = self.arguments()?;
                    Ok(Expr::Call {
                        function: name,
                        args,
                        kwargs,
                    })
                } else {
                    Ok(Expr::Name(name))
                }
            }
            Some(token) => Err(TemplateError::syntax(offset, format!("unexpected token {:?}", token))),
            None => Err(TemplateError::syntax(offset, "unexpected end of expression")),
        }
    }

    #[allow(clippy::type_complexity)]
    fn arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), TemplateError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            let keyword = match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
                (Some((Token::Ident(name), _)), Some((Token::Assign, _))) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.pos += 2;
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(TemplateError::syntax(
                        self.offset(),
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.expression()?);
            }
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok((args, kwargs))
    }
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<TemplateValue, TemplateError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => scope
            .bindings
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::Undefined(name.clone())),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(TemplateValue::List),
        Expr::Neg(inner) => match eval(inner, scope)? {
            TemplateValue::Int(i) => i
                .checked_neg()
                .map(TemplateValue::Int)
                .ok_or_else(|| TemplateError::Type("arithmetic overflow".to_string())),
            TemplateValue::Float(f) => Ok(TemplateValue::Float(-f)),
            TemplateValue::TimeDelta(d) => Ok(TemplateValue::TimeDelta(-d)),
            other => Err(TemplateError::Type(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        },
        Expr::Binary { op, lhs, rhs } => binary(*op, eval(lhs, scope)?, eval(rhs, scope)?),
        Expr::Call {
            function,
            args,
            kwargs,
        } => {
            if let Some(bound) = scope.bindings.get(function) {
                return Err(TemplateError::Type(format!(
                    "'{}' object is not callable",
                    bound.type_name()
                )));
            }
            if !FUNCTIONS.contains(&function.as_str()) {
                return Err(TemplateError::Disallowed(format!("function '{}'", function)));
            }
            let args = Arguments::evaluate(function, args, kwargs, scope)?;
            call(function, args, scope)
        }
        Expr::Method {
            target,
            method,
            args,
            kwargs,
        } => {
            let target = eval(target, scope)?;
            let args = Arguments::evaluate(method, args, kwargs, scope)?;
            call_method(target, method, args)
        }
    }
}

fn binary(op: BinaryOp, lhs: TemplateValue, rhs: TemplateValue) -> Result<TemplateValue, TemplateError> {
    use TemplateValue::{Date, DateTime, Float, Int, List, Str, TimeDelta};

    let overflow = || TemplateError::Type("arithmetic overflow".to_string());
    let result = match (op, &lhs, &rhs) {
        (BinaryOp::Add, Int(a), Int(b)) => Int(a.checked_add(*b).ok_or_else(overflow)?),
        (BinaryOp::Sub, Int(a), Int(b)) => Int(a.checked_sub(*b).ok_or_else(overflow)?),
        (op, Int(_) | Float(_), Int(_) | Float(_)) => {
            let a = as_f64(&lhs).unwrap_or(0.0);
            let b = as_f64(&rhs).unwrap_or(0.0);
            Float(if op == BinaryOp::Add { a + b } else { a - b })
        }
        (BinaryOp::Add, Str(a), Str(b)) => Str(format!("{}{}", a, b)),
        (BinaryOp::Add, List(a), List(b)) => List(a.iter().chain(b.iter()).cloned().collect()),
        (op, DateTime(ts), TimeDelta(d)) => {
            let shifted = if op == BinaryOp::Add {
                ts.checked_add_signed(*d)
            } else {
                ts.checked_sub_signed(*d)
            };
            DateTime(shifted.ok_or_else(overflow)?)
        }
        (BinaryOp::Add, TimeDelta(d), DateTime(ts)) => {
            DateTime(ts.checked_add_signed(*d).ok_or_else(overflow)?)
        }
        (op, Date(day), TimeDelta(d)) => {
            let days = Duration::days(d.num_days());
            let shifted = if op == BinaryOp::Add {
                day.checked_add_signed(days)
            } else {
                day.checked_sub_signed(days)
            };
            Date(shifted.ok_or_else(overflow)?)
        }
        (BinaryOp::Sub, DateTime(a), DateTime(b)) => TimeDelta(a.signed_duration_since(*b)),
        (BinaryOp::Sub, Date(a), Date(b)) => TimeDelta(a.signed_duration_since(*b)),
        (op, TimeDelta(a), TimeDelta(b)) => {
            let combined = if op == BinaryOp::Add {
                a.checked_add(b)
            } else {
                a.checked_sub(b)
            };
            TimeDelta(combined.ok_or_else(overflow)?)
        }
        (op, _, _) => {
            let symbol = if op == BinaryOp::Add { "+" } else { "-" };
            return Err(TemplateError::Type(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                symbol,
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    };
    Ok(result)
}

fn as_f64(value: &TemplateValue) -> Option<f64> {
    match value {
        TemplateValue::Int(i) => Some(*i as f64),
        TemplateValue::Float(f) => Some(*f),
        _ => None,
    }
}

/// Evaluated call arguments with Python-style binding helpers
struct Arguments<'n> {
    function: &'n str,
    positional: Vec<TemplateValue>,
    keyword: Vec<(String, TemplateValue)>,
}

impl<'n> Arguments<'n> {
    fn evaluate(
        function: &'n str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        scope: &Scope<'_>,
    ) -> Result<Self, TemplateError> {
        let positional = args
            .iter()
            .map(|arg| eval(arg, scope))
            .collect::<Result<Vec<_>, _>>()?;
        let keyword = kwargs
            .iter()
            .map(|(name, arg)| eval(arg, scope).map(|value| (name.clone(), value)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            function,
            positional,
            keyword,
        })
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::arguments(self.function, message)
    }

    /// Bind to parameter names; result is positional, `None` where unset
    fn bind(self, params: &[&str]) -> Result<Vec<Option<TemplateValue>>, TemplateError> {
        if self.positional.len() > params.len() {
            return Err(self.error(format!(
                "takes at most {} arguments ({} given)",
                params.len(),
                self.positional.len()
            )));
        }
        let mut bound: Vec<Option<TemplateValue>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(self.positional.iter()) {
            *slot = Some(value.clone());
        }
        for (name, value) in &self.keyword {
            let index = params
                .iter()
                .position(|p| p == name)
                .ok_or_else(|| self.error(format!("unexpected keyword argument '{}'", name)))?;
            if bound[index].is_some() {
                return Err(self.error(format!("got multiple values for argument '{}'", name)));
            }
            bound[index] = Some(value.clone());
        }
        Ok(bound)
    }

    fn none(self) -> Result<(), TemplateError> {
        if self.positional.is_empty() && self.keyword.is_empty() {
            Ok(())
        } else {
            Err(self.error("takes no arguments"))
        }
    }
}

fn int_arg(function: &str, name: &str, value: Option<TemplateValue>, default: Option<i64>) -> Result<i64, TemplateError> {
    match value {
        Some(TemplateValue::Int(i)) => Ok(i),
        Some(other) => Err(TemplateError::arguments(
            function,
            format!("'{}' must be int, not {}", name, other.type_name()),
        )),
        None => default.ok_or_else(|| {
            TemplateError::arguments(function, format!("missing required argument '{}'", name))
        }),
    }
}

fn str_arg(function: &str, name: &str, value: Option<TemplateValue>) -> Result<String, TemplateError> {
    match value {
        Some(TemplateValue::Str(s)) => Ok(s),
        Some(other) => Err(TemplateError::arguments(
            function,
            format!("'{}' must be str, not {}", name, other.type_name()),
        )),
        None => Err(TemplateError::arguments(
            function,
            format!("missing required argument '{}'", name),
        )),
    }
}

fn to_u32(function: &str, value: i64) -> Result<u32, TemplateError> {
    u32::try_from(value).map_err(|_| TemplateError::arguments(function, format!("{} is out of range", value)))
}

fn make_date(function: &str, year: i64, month: i64, day: i64) -> Result<NaiveDate, TemplateError> {
    let year = i32::try_from(year).map_err(|_| TemplateError::arguments(function, "year is out of range"))?;
    NaiveDate::from_ymd_opt(year, to_u32(function, month)?, to_u32(function, day)?)
        .ok_or_else(|| TemplateError::arguments(function, "day is out of range for month"))
}

fn call(function: &str, args: Arguments<'_>, scope: &Scope<'_>) -> Result<TemplateValue, TemplateError> {
    match function {
        "datetime" => {
            let mut bound = args
                .bind(&["year", "month", "day", "hour", "minute", "second", "microsecond"])?
                .into_iter();
            let mut next = |name: &str, default: Option<i64>| int_arg(function, name, bound.next().flatten(), default);
            let year = next("year", None)?;
            let month = next("month", None)?;
            let day = next("day", None)?;
            let hour = next("hour", Some(0))?;
            let minute = next("minute", Some(0))?;
            let second = next("second", Some(0))?;
            let micro = next("microsecond", Some(0))?;
            let date = make_date(function, year, month, day)?;
            let time = NaiveTime::from_hms_micro_opt(
                to_u32(function, hour)?,
                to_u32(function, minute)?,
                to_u32(function, second)?,
                to_u32(function, micro)?,
            )
            .ok_or_else(|| TemplateError::arguments(function, "time component out of range"))?;
            Ok(TemplateValue::DateTime(date.and_time(time)))
        }
        "date" => {
            let mut bound = args.bind(&["year", "month", "day"])?.into_iter();
            let year = int_arg(function, "year", bound.next().flatten(), None)?;
            let month = int_arg(function, "month", bound.next().flatten(), None)?;
            let day = int_arg(function, "day", bound.next().flatten(), None)?;
            Ok(TemplateValue::Date(make_date(function, year, month, day)?))
        }
        "timedelta" => {
            const PARAMS: [(&str, f64); 7] = [
                ("days", 86_400_000_000.0),
                ("seconds", 1_000_000.0),
                ("microseconds", 1.0),
                ("milliseconds", 1_000.0),
                ("minutes", 60_000_000.0),
                ("hours", 3_600_000_000.0),
                ("weeks", 604_800_000_000.0),
            ];
            let names: Vec<&str> = PARAMS.iter().map(|(n, _)| *n).collect();
            let bound = args.bind(&names)?;
            let mut micros = 0.0;
            for ((name, scale), value) in PARAMS.iter().zip(bound) {
                if let Some(value) = value {
                    let amount = as_f64(&value).ok_or_else(|| {
                        TemplateError::arguments(
                            function,
                            format!("'{}' must be a number, not {}", name, value.type_name()),
                        )
                    })?;
                    micros += amount * scale;
                }
            }
            if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
                return Err(TemplateError::arguments(function, "value out of range"));
            }
            Ok(TemplateValue::TimeDelta(Duration::microseconds(micros.round() as i64)))
        }
        "now" => args.none().map(|_| TemplateValue::DateTime(scope.now())),
        "utcnow" => args.none().map(|_| TemplateValue::DateTime(scope.utcnow())),
        "today" => args.none().map(|_| TemplateValue::Date(scope.now().date())),
        "current_user_id" => args.none().map(|_| {
            scope
                .context
                .user_id
                .map(TemplateValue::Int)
                .unwrap_or(TemplateValue::None)
        }),
        "current_username" => args.none().map(|_| {
            scope
                .context
                .username
                .clone()
                .map(TemplateValue::Str)
                .unwrap_or(TemplateValue::None)
        }),
        "url_param" => {
            let mut bound = args.bind(&["param", "default"])?.into_iter();
            let name = str_arg(function, "param", bound.next().flatten())?;
            let default = bound.next().flatten().unwrap_or(TemplateValue::None);
            Ok(scope
                .context
                .url_params
                .get(&name)
                .map(|v| TemplateValue::Str(v.clone()))
                .unwrap_or(default))
        }
        "filter_values" => {
            let mut bound = args.bind(&["column", "default"])?.into_iter();
            let column = str_arg(function, "column", bound.next().flatten())?;
            let default = bound.next().flatten();
            match scope.context.filters.get(&column) {
                Some(values) if !values.is_empty() => Ok(TemplateValue::List(
                    values.iter().map(|v| TemplateValue::Str(v.clone())).collect(),
                )),
                _ => Ok(match default {
                    Some(TemplateValue::List(items)) => TemplateValue::List(items),
                    Some(TemplateValue::None) | None => TemplateValue::List(Vec::new()),
                    Some(single) => TemplateValue::List(vec![single]),
                }),
            }
        }
        other => Err(TemplateError::Disallowed(format!("function '{}'", other))),
    }
}

/// Format with a strftime pattern, rejecting invalid specifiers instead of panicking
fn strftime(items: StrftimeItems<'_>, render: impl FnOnce(Vec<Item<'_>>) -> String) -> Result<String, TemplateError> {
    let parsed: Vec<Item<'_>> = items.collect();
    if parsed.iter().any(|item| matches!(item, Item::Error)) {
        return Err(TemplateError::arguments("strftime", "invalid format string"));
    }
    Ok(render(parsed))
}

fn call_method(target: TemplateValue, method: &str, args: Arguments<'_>) -> Result<TemplateValue, TemplateError> {
    use TemplateValue::{Date, DateTime, Float, List, Str};

    match (&target, method) {
        (DateTime(ts), "isoformat") => {
            let mut bound = args.bind(&["sep"])?.into_iter();
            let iso = format_naive(ts);
            match bound.next().flatten() {
                Some(Str(sep)) => Ok(Str(iso.replacen('T', &sep, 1))),
                Some(other) => Err(TemplateError::arguments(
                    method,
                    format!("'sep' must be str, not {}", other.type_name()),
                )),
                None => Ok(Str(iso)),
            }
        }
        (DateTime(ts), "strftime") => {
            let mut bound = args.bind(&["format"])?.into_iter();
            let format = str_arg(method, "format", bound.next().flatten())?;
            let text = strftime(StrftimeItems::new(&format), |items| {
                ts.format_with_items(items.into_iter()).to_string()
            })?;
            Ok(Str(text))
        }
        (DateTime(ts), "date") => args.none().map(|_| Date(ts.date())),
        (DateTime(ts), "timestamp") => args.none().map(|_| {
            let utc = ts.and_utc();
            Float(utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_micros()) / 1e6)
        }),
        (Date(day), "isoformat") => args.none().map(|_| Str(day.format("%Y-%m-%d").to_string())),
        (Date(day), "strftime") => {
            let mut bound = args.bind(&["format"])?.into_iter();
            let format = str_arg(method, "format", bound.next().flatten())?;
            let text = strftime(StrftimeItems::new(&format), |items| {
                day.format_with_items(items.into_iter()).to_string()
            })?;
            Ok(Str(text))
        }
        (Str(s), "upper") => args.none().map(|_| Str(s.to_uppercase())),
        (Str(s), "lower") => args.none().map(|_| Str(s.to_lowercase())),
        (Str(s), "strip") => {
            let mut bound = args.bind(&["chars"])?.into_iter();
            match bound.next().flatten() {
                Some(Str(chars)) => Ok(Str(s.trim_matches(|c| chars.contains(c)).to_string())),
                Some(TemplateValue::None) | None => Ok(Str(s.trim().to_string())),
                Some(other) => Err(TemplateError::arguments(
                    method,
                    format!("'chars' must be str, not {}", other.type_name()),
                )),
            }
        }
        (Str(sep), "join") => {
            let mut bound = args.bind(&["iterable"])?.into_iter();
            match bound.next().flatten() {
                Some(List(items)) => {
                    let parts: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                    Ok(Str(parts.join(sep)))
                }
                Some(other) => Err(TemplateError::arguments(
                    method,
                    format!("can only join a list, not {}", other.type_name()),
                )),
                None => Err(TemplateError::arguments(method, "missing required argument 'iterable'")),
            }
        }
        _ => Err(TemplateError::Disallowed(format!(
            "method '{}' on {}",
            method,
            target.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(source: &str) -> Result<TemplateValue, TemplateError> {
        let context = TemplateContext::new();
        let bindings = HashMap::new();
        evaluate(source, 0, &Scope::new(&context, &bindings))
    }

    #[test]
    fn test_datetime_keywords() {
        assert_eq!(
            eval_str("datetime(2017, 1, day=2, hour=3).isoformat()").unwrap(),
            TemplateValue::Str("2017-01-02T03:00:00".into())
        );
        assert_eq!(
            eval_str("datetime(2017, 1, 1, 0, 0, 0, 500).isoformat(' ')").unwrap(),
            TemplateValue::Str("2017-01-01 00:00:00.000500".into())
        );
    }

    #[test]
    fn test_bad_arguments() {
        assert!(matches!(
            eval_str("datetime(2017, 13, 1)").unwrap_err(),
            TemplateError::Arguments { .. }
        ));
        assert!(matches!(
            eval_str("datetime(2017, 1, 1, year=2018)").unwrap_err(),
            TemplateError::Arguments { .. }
        ));
        assert!(matches!(
            eval_str("now(1)").unwrap_err(),
            TemplateError::Arguments { .. }
        ));
    }

    #[test]
    fn test_invalid_strftime_is_error() {
        assert!(eval_str("date(2017, 1, 1).strftime('%Q')").is_err());
        assert_eq!(
            eval_str("date(2017, 1, 1).strftime('%d/%m/%Y')").unwrap(),
            TemplateValue::Str("01/01/2017".into())
        );
    }

    #[test]
    fn test_timestamp_and_date_methods() {
        assert_eq!(
            eval_str("datetime(1970, 1, 2).timestamp()").unwrap(),
            TemplateValue::Float(86400.0)
        );
        assert_eq!(
            eval_str("datetime(2017, 5, 6, 7).date().isoformat()").unwrap(),
            TemplateValue::Str("2017-05-06".into())
        );
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval_str("' Ab '.strip().upper()").unwrap(), TemplateValue::Str("AB".into()));
        assert_eq!(eval_str("'xAx'.strip('x').lower()").unwrap(), TemplateValue::Str("a".into()));
        assert_eq!(
            eval_str("'-'.join(['a', 1, 2.5])").unwrap(),
            TemplateValue::Str("a-1-2.5".into())
        );
    }

    #[test]
    fn test_disallowed_methods_and_attributes() {
        assert!(matches!(eval_str("'a'.format(1)").unwrap_err(), TemplateError::Disallowed(_)));
        assert!(matches!(
            eval_str("datetime(2017, 1, 1).year").unwrap_err(),
            TemplateError::Disallowed(_)
        ));
        assert!(matches!(eval_str("__import__('os')").unwrap_err(), TemplateError::Disallowed(_)));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(eval_str("'a' - 'b'").unwrap_err(), TemplateError::Type(_)));
        assert!(matches!(eval_str("-'a'").unwrap_err(), TemplateError::Type(_)));
        assert!(matches!(
            eval_str("9223372036854775807 + 1").unwrap_err(),
            TemplateError::Type(_)
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(eval_str("(1 + 2").unwrap_err(), TemplateError::Syntax { .. }));
        assert!(matches!(eval_str("1 2").unwrap_err(), TemplateError::Syntax { offset: 2, .. }));
        assert!(matches!(eval_str("f(x=1, 2)").unwrap_err(), TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(
            eval_str(&nested),
            Err(TemplateError::Syntax { ref message, .. }) if message == "expression nested too deeply"
        ));

        let chained = vec!["1"; 10_000].join(" + ");
        assert!(matches!(eval_str(&chained), Err(TemplateError::Syntax { .. })));
        assert!(matches!(eval_str(&"-".repeat(10_000)), Err(TemplateError::Syntax { .. })));
        assert!(matches!(
            eval_str(&format!("'a'{}", ".upper()".repeat(10_000))),
            Err(TemplateError::Syntax { .. })
        ));

        // ordinary nesting still works
        assert_eq!(eval_str("((((1 + 2)))) - -3").unwrap(), TemplateValue::Int(6));
    }

    #[test]
    fn test_negating_min_int_overflows() {
        assert_eq!(
            eval_str("-(0 - 9223372036854775807 - 1)").unwrap_err(),
            TemplateError::Type("arithmetic overflow".to_string())
        );
    }

    #[test]
    fn test_date_subtraction() {
        assert_eq!(
            eval_str("date(2017, 1, 8) - date(2017, 1, 1)").unwrap(),
            TemplateValue::TimeDelta(Duration::days(7))
        );
        assert_eq!(
            eval_str("(datetime(2017, 1, 1) + -timedelta(hours=1)).isoformat()").unwrap(),
            TemplateValue::Str("2016-12-31T23:00:00".into())
        );
    }
}
