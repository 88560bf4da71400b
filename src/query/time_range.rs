//! Time-range expressions
//!
//! A range is `"<since> : <until>"`. Each side is empty (unbounded), an ISO
//! date or datetime, one of `now`/`today`/`yesterday`/`tomorrow`, a relative
//! phrase such as `7 days ago`, `2 weeks later` or `last month`, or a
//! `DATEADD(DATETIME('today'), -7, day)` call. The whole range may also be one
//! of the presets `Last day|week|month|quarter|year` or `No filter`.

use chrono::{Days, Months, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

use crate::data::value::parse_timestamp_literal;
use crate::data::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeRangeError {
    #[error("Invalid time expression: {0}")]
    InvalidExpression(String),

    #[error("From date cannot be larger than to date")]
    Inverted,
}

/// Resolved bounds; `None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeBounds {
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Unit {
    fn parse(text: &str) -> Option<Unit> {
        let text = text.trim().to_lowercase();
        let singular = text.strip_suffix('s').unwrap_or(&text);
        match singular {
            "second" | "sec" => Some(Unit::Second),
            "minute" | "min" => Some(Unit::Minute),
            "hour" => Some(Unit::Hour),
            "day" => Some(Unit::Day),
            "week" => Some(Unit::Week),
            "month" => Some(Unit::Month),
            "quarter" => Some(Unit::Quarter),
            "year" => Some(Unit::Year),
            _ => None,
        }
    }
}

/// Shift `ts` by `amount` units, calendar-aware for months and years
fn shift(ts: NaiveDateTime, amount: i64, unit: Unit) -> Option<NaiveDateTime> {
    let seconds = |n: i64| ts.checked_add_signed(chrono::Duration::try_seconds(n)?);
    match unit {
        Unit::Second => seconds(amount),
        Unit::Minute => seconds(amount.checked_mul(60)?),
        Unit::Hour => seconds(amount.checked_mul(3600)?),
        Unit::Day | Unit::Week => {
            let days = if unit == Unit::Week { amount.checked_mul(7)? } else { amount };
            let magnitude = Days::new(days.unsigned_abs());
            if days >= 0 {
                ts.checked_add_days(magnitude)
            } else {
                ts.checked_sub_days(magnitude)
            }
        }
        Unit::Month | Unit::Quarter | Unit::Year => {
            let months = match unit {
                Unit::Month => amount,
                Unit::Quarter => amount.checked_mul(3)?,
                _ => amount.checked_mul(12)?,
            };
            let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
            if months >= 0 {
                ts.checked_add_months(magnitude)
            } else {
                ts.checked_sub_months(magnitude)
            }
        }
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

fn relative_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d+)\s+([a-z]+?)\s+(ago|later|from now)$").expect("static regex")
    })
}

fn dateadd_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)^DATEADD\(\s*DATETIME\(\s*['"]([^'"]+)['"]\s*\)\s*,\s*(-?\d+)\s*,\s*([a-z]+)\s*\)$"#)
            .expect("static regex")
    })
}

/// Resolve one side of a range against `now`
pub fn parse_time_expression(text: &str, now: NaiveDateTime) -> Result<Option<NaiveDateTime>, TimeRangeError> {
    let trimmed = text.trim();
    let invalid = || TimeRangeError::InvalidExpression(trimmed.to_string());
    let today = midnight(now.date());

    let resolved = match trimmed.to_lowercase().as_str() {
        "" | "none" | "null" => return Ok(None),
        "now" => now,
        "today" => today,
        "yesterday" => shift(today, -1, Unit::Day).ok_or_else(invalid)?,
        "tomorrow" => shift(today, 1, Unit::Day).ok_or_else(invalid)?,
        lower => {
            if let Some(unit) = lower.strip_prefix("last ").and_then(Unit::parse) {
                shift(today, -1, unit).ok_or_else(invalid)?
            } else if let Some(caps) = relative_regex().captures(trimmed) {
                let amount: i64 = caps[1].parse().map_err(|_| invalid())?;
                let unit = Unit::parse(&caps[2]).ok_or_else(invalid)?;
                let signed = if caps[3].eq_ignore_ascii_case("ago") { -amount } else { amount };
                shift(now, signed, unit).ok_or_else(invalid)?
            } else if let Some(caps) = dateadd_regex().captures(trimmed) {
                let base = parse_time_expression(&caps[1], now)?.ok_or_else(invalid)?;
                let amount: i64 = caps[2].parse().map_err(|_| invalid())?;
                let unit = Unit::parse(&caps[3]).ok_or_else(invalid)?;
                shift(base, amount, unit).ok_or_else(invalid)?
            } else {
                match parse_timestamp_literal(trimmed) {
                    Some(Value::Timestamp(ts)) => ts,
                    Some(Value::TimestampTz(ts)) => ts.naive_local(),
                    _ => return Err(invalid()),
                }
            }
        }
    };
    Ok(Some(resolved))
}

/// Resolve a `"<since> : <until>"` range
pub fn resolve_time_range(range: &str, now: NaiveDateTime) -> Result<TimeBounds, TimeRangeError> {
    let trimmed = range.trim();
    let today = midnight(now.date());
    let lower = trimmed.to_lowercase();

    if lower.is_empty() || lower == "no filter" {
        return Ok(TimeBounds::default());
    }
    if let Some(unit) = lower.strip_prefix("last ").and_then(Unit::parse) {
        if !trimmed.contains(" : ") {
            let since = shift(today, -1, unit)
                .ok_or_else(|| TimeRangeError::InvalidExpression(trimmed.to_string()))?;
            return Ok(TimeBounds {
                since: Some(since),
                until: Some(today),
            });
        }
    }

    let (since, until) = match trimmed.split_once(" : ") {
        Some((since, until)) => (since, until),
        // A single expression is the lower bound
        None => (trimmed, ""),
    };
    let bounds = TimeBounds {
        since: parse_time_expression(since, now)?,
        until: parse_time_expression(until, now)?,
    };
    if let (Some(since), Some(until)) = (bounds.since, bounds.until) {
        if since > until {
            return Err(TimeRangeError::Inverted);
        }
    }
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::value::parse_naive_timestamp;

    fn at(s: &str) -> NaiveDateTime {
        parse_naive_timestamp(s).unwrap()
    }

    fn now() -> NaiveDateTime {
        at("2017-03-15 10:30:00")
    }

    #[test]
    fn test_absolute_range() {
        let bounds = resolve_time_range("2017-01-01 : 2017-01-02", now()).unwrap();
        assert_eq!(bounds.since, Some(at("2017-01-01")));
        assert_eq!(bounds.until, Some(at("2017-01-02")));
    }

    #[test]
    fn test_open_ended_ranges() {
        let bounds = resolve_time_range(" : 2017-01-02T12:00:00", now()).unwrap();
        assert_eq!(bounds.since, None);
        assert_eq!(bounds.until, Some(at("2017-01-02 12:00:00")));

        assert_eq!(resolve_time_range("No filter", now()).unwrap(), TimeBounds::default());
        assert_eq!(
            resolve_time_range("now", now()).unwrap(),
            TimeBounds { since: Some(now()), until: None }
        );
    }

    #[test]
    fn test_relative_expressions() {
        let bounds = resolve_time_range("7 days ago : now", now()).unwrap();
        assert_eq!(bounds.since, Some(at("2017-03-08 10:30:00")));
        assert_eq!(bounds.until, Some(now()));

        assert_eq!(
            parse_time_expression("1 month ago", now()).unwrap(),
            Some(at("2017-02-15 10:30:00"))
        );
        assert_eq!(
            parse_time_expression("DATEADD(DATETIME('today'), -7, day)", now()).unwrap(),
            Some(at("2017-03-08"))
        );
        assert_eq!(parse_time_expression("yesterday", now()).unwrap(), Some(at("2017-03-14")));
    }

    #[test]
    fn test_presets() {
        let bounds = resolve_time_range("Last week", now()).unwrap();
        assert_eq!(bounds.since, Some(at("2017-03-08")));
        assert_eq!(bounds.until, Some(at("2017-03-15")));

        let bounds = resolve_time_range("Last quarter", now()).unwrap();
        assert_eq!(bounds.since, Some(at("2016-12-15")));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(
            resolve_time_range("soon : later", now()),
            Err(TimeRangeError::InvalidExpression(_))
        ));
        assert_eq!(
            resolve_time_range("2017-01-02 : 2017-01-01", now()),
            Err(TimeRangeError::Inverted)
        );
    }
}
