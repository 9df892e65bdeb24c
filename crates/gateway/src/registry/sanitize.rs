//! Field allowlisting and type coercion.
//!
//! Values that cannot be coerced to the declared kind are dropped. `null` is
//! always kept so callers can clear a field.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use common::Fields;
use serde_json::{Number, Value};
use tracing::debug;

/// Declared type of an allowed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Trimmed string. Numbers and booleans are rendered as text.
    Text,
    /// Any JSON number, or a numeric string.
    Number,
    /// Whole number, or a string holding one.
    Integer,
    /// Boolean, `"true"`/`"false"`/`"yes"`/`"no"`/`"1"`/`"0"`, or 0/1.
    Boolean,
    /// Calendar day, normalised to `YYYY-MM-DD`.
    Date,
    /// RFC 3339 instant, normalised to UTC with millisecond precision.
    Timestamp,
    /// Identifier of another row: non-empty string or integer, kept as given.
    Reference,
    /// Arbitrary JSON, kept as given.
    Json,
}

/// One allowlisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldRule {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Keep exactly the fields named in `rules`, coerced to their kinds.
pub fn sanitize(input: Fields, rules: &[FieldRule]) -> Fields {
    let mut out = Fields::new();
    for (name, value) in input {
        let Some(rule) = rules.iter().find(|r| r.name == name) else {
            debug!(field = %name, "dropping field outside allowlist");
            continue;
        };
        match coerce(value, rule.kind) {
            Some(v) => {
                out.insert(name, v);
            }
            None => debug!(field = %name, kind = ?rule.kind, "dropping field that failed coercion"),
        }
    }
    out
}

/// Coerce one value, `None` when it cannot be represented as `kind`.
pub fn coerce(value: Value, kind: FieldKind) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    match kind {
        FieldKind::Text => match value {
            Value::String(s) => Some(Value::String(s.trim().to_owned())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldKind::Number => match value {
            Value::Number(_) => Some(value),
            Value::String(s) => parse_number(s.trim()),
            _ => None,
        },
        FieldKind::Integer => match &value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldKind::Boolean => match &value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        FieldKind::Date => value
            .as_str()
            .and_then(parse_date)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        FieldKind::Timestamp => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|dt| {
                Value::String(
                    dt.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                )
            }),
        FieldKind::Reference => match &value {
            Value::String(s) if !s.trim().is_empty() => Some(Value::String(s.trim().to_owned())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Number(n.clone())),
            _ => None,
        },
        FieldKind::Json => Some(value),
    }
}

/// Parse `YYYY-MM-DD`, or the date part of an RFC 3339 timestamp.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
