//! Sandboxed SQL templating
//!
//! Templates are literal text with `{{ expr }}` substitutions and
//! `{# comment #}` blocks. Expressions are evaluated by a small interpreter
//! over an explicit allow-list of functions and methods; anything else,
//! including `{% %}` statement blocks and underscore attributes, is rejected.
//!
//! ```text
//! SELECT '{{ datetime(2017, 1, 1).isoformat() }}' AS test
//! WHERE ds >= '{{ (today() - timedelta(days=7)).isoformat() }}'
//! ```

mod eval;
mod lexer;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use thiserror::Error;

use crate::data::value::format_naive;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Template syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Disallowed template construct: {0}")]
    Disallowed(String),

    #[error("Undefined template variable: {0}")]
    Undefined(String),

    #[error("Template type error: {0}")]
    Type(String),

    #[error("Invalid arguments to {function}: {message}")]
    Arguments { function: String, message: String },
}

impl TemplateError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        TemplateError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn arguments(function: &str, message: impl Into<String>) -> Self {
        TemplateError::Arguments {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

/// Value produced while evaluating a template expression
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<TemplateValue>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    TimeDelta(Duration),
}

impl TemplateValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            TemplateValue::None => "NoneType",
            TemplateValue::Bool(_) => "bool",
            TemplateValue::Int(_) => "int",
            TemplateValue::Float(_) => "float",
            TemplateValue::Str(_) => "str",
            TemplateValue::List(_) => "list",
            TemplateValue::DateTime(_) => "datetime",
            TemplateValue::Date(_) => "date",
            TemplateValue::TimeDelta(_) => "timedelta",
        }
    }

    /// Convert a JSON template parameter
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => TemplateValue::None,
            serde_json::Value::Bool(b) => TemplateValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => TemplateValue::Int(i),
                None => TemplateValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => TemplateValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                TemplateValue::List(items.iter().map(TemplateValue::from_json).collect())
            }
            other => TemplateValue::Str(other.to_string()),
        }
    }

    /// Quoted form used inside list renderings
    fn repr(&self) -> String {
        match self {
            TemplateValue::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateValue::None => write!(f, "None"),
            TemplateValue::Bool(true) => write!(f, "True"),
            TemplateValue::Bool(false) => write!(f, "False"),
            TemplateValue::Int(i) => write!(f, "{}", i),
            TemplateValue::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{:.1}", v)
            }
            TemplateValue::Float(v) => write!(f, "{}", v),
            TemplateValue::Str(s) => write!(f, "{}", s),
            TemplateValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.repr()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            TemplateValue::DateTime(ts) => write!(f, "{}", format_naive(ts).replacen('T', " ", 1)),
            TemplateValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            TemplateValue::TimeDelta(delta) => write!(f, "{}", format_timedelta(delta)),
        }
    }
}

/// `[-]D day[s], H:MM:SS[.ffffff]` with days floored like Python
fn format_timedelta(delta: &Duration) -> String {
    const MICROS_PER_DAY: i64 = 86_400_000_000;
    let total = delta.num_microseconds().unwrap_or(i64::MAX);
    let days = total.div_euclid(MICROS_PER_DAY);
    let rest = total.rem_euclid(MICROS_PER_DAY);
    let secs = rest / 1_000_000;
    let micros = rest % 1_000_000;

    let mut out = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        out.push_str(&format!("{} day{}, ", days, plural));
    }
    out.push_str(&format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60));
    if micros != 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Str(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::Str(value)
    }
}

impl From<i64> for TemplateValue {
    fn from(value: i64) -> Self {
        TemplateValue::Int(value)
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        TemplateValue::Float(value)
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        TemplateValue::Bool(value)
    }
}

impl From<NaiveDateTime> for TemplateValue {
    fn from(value: NaiveDateTime) -> Self {
        TemplateValue::DateTime(value)
    }
}

/// Caller-supplied facts a template may read
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub url_params: HashMap<String, String>,
    /// Active filter values by column
    pub filters: HashMap<String, Vec<String>>,
    /// Fixed clock; wall clock when unset
    pub now: Option<NaiveDateTime>,
    /// Render-time keyword bindings
    pub bindings: HashMap<String, TemplateValue>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: i64, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.username = Some(username.into());
        self
    }

    pub fn with_url_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.insert(name.into(), value.into());
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, values: Vec<String>) -> Self {
        self.filters.insert(column.into(), values);
        self
    }

    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }
}

/// Renders templates; bindings given here are overridden by render-time ones
#[derive(Debug, Clone, Default)]
pub struct TemplateProcessor {
    bindings: HashMap<String, TemplateValue>,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn process(&self, template: &str, context: &TemplateContext) -> Result<String, TemplateError> {
        let mut bindings = self.bindings.clone();
        bindings.extend(
            context
                .bindings
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        let scope = eval::Scope::new(context, &bindings);

        let mut out = String::with_capacity(template.len());
        for segment in lexer::segments(template)? {
            match segment {
                lexer::Segment::Text(text) => out.push_str(text),
                lexer::Segment::Expr { source, offset } => {
                    let value = eval::evaluate(source, offset, &scope)?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}

/// Render with no construction-time bindings
pub fn render(template: &str, context: &TemplateContext) -> Result<String, TemplateError> {
    TemplateProcessor::new().process(template, context)
}
