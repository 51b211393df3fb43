//! Prediction of the values the remote system stores for typed fields.
//!
//! # Overview
//! The remote API coerces every value written to a field according to the
//! field's declared type. `normalize` reproduces those coercions so a caller
//! can tell, before sending anything, whether an update would change the
//! stored value (`needs_update`) or whether a value counts as empty
//! (`is_empty`).
//!
//! # Design
//! - `FieldSpec` is built once per field, either from a `FieldType` or from
//!   the dynamic settings the remote reports (`from_settings`). Unknown type
//!   names are rejected there, so `normalize` itself never fails.
//! - Inputs are `serde_json::Value`s; strings, numbers and booleans are the
//!   scalars, arrays and objects are not.
//! - Dates are interpreted in a fixed reference offset held by `Normalizer`
//!   (UTC for the free functions).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::datetime::parse_lenient;
use crate::error::FieldSpecError;

/// Declared type of a remote field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "select")]
    Select,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "empty_date")]
    EmptyDate,
    #[serde(rename = "empty_datetime")]
    EmptyDateTime,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Select => "select",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::EmptyDate => "empty_date",
            FieldType::EmptyDateTime => "empty_datetime",
        }
    }

    /// The value stored for an empty or unparseable date.
    fn zero_date(self) -> &'static str {
        match self {
            FieldType::Date => "0000-00-00",
            FieldType::DateTime => "0000-00-00 00:00:00",
            _ => "",
        }
    }
}

impl FromStr for FieldType {
    type Err = FieldSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "text" => FieldType::Text,
            "email" => FieldType::Email,
            "select" => FieldType::Select,
            "integer" => FieldType::Integer,
            "float" => FieldType::Float,
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "empty_date" => FieldType::EmptyDate,
            "empty_datetime" => FieldType::EmptyDateTime,
            other => return Err(FieldSpecError::UnknownFieldType(other.to_string())),
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one named field behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// `None` passes values through untouched.
    #[serde(rename = "type", default)]
    pub field_type: Option<FieldType>,
    /// Choices of a select field, right-trimmed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Whether a caller-supplied zero counts as empty for numeric fields.
    #[serde(default)]
    pub zero_is_empty: bool,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type: Some(field_type),
            ..Self::default()
        }
    }

    pub fn untyped() -> Self {
        Self::default()
    }

    pub fn select<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            field_type: Some(FieldType::Select),
            choices: choices.into_iter().map(|c| c.as_ref().trim_end().to_string()).collect(),
            zero_is_empty: false,
        }
    }

    pub fn with_zero_is_empty(mut self, zero_is_empty: bool) -> Self {
        self.zero_is_empty = zero_is_empty;
        self
    }

    /// Build a spec from dynamic settings: a bare type name, or an object with
    /// `type`, optional `selection` / `choices` (array or newline-separated
    /// string) and optional `zero_is_empty`. `null` yields an untyped spec.
    pub fn from_settings(settings: &Value) -> Result<Self, FieldSpecError> {
        let object = match settings {
            Value::Null => return Ok(Self::untyped()),
            Value::String(name) => return Ok(Self::new(name.parse()?)),
            Value::Object(object) => object,
            other => return Err(FieldSpecError::InvalidSettings(format!("expected a type name or object, got {other}"))),
        };

        let field_type = match object.get("type") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.parse::<FieldType>()?),
            Some(other) => return Err(FieldSpecError::InvalidSettings(format!("type must be a string, got {other}"))),
        };

        let choices = match object.get("choices").or_else(|| object.get("selection")) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(lines)) => lines.lines().map(|c| c.trim_end().to_string()).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| scalar_text(item).trim_end().to_string())
                .collect(),
            Some(other) => {
                return Err(FieldSpecError::InvalidSettings(format!(
                    "choices must be a list or string, got {other}"
                )))
            }
        };

        let zero_is_empty = match object.get("zero_is_empty") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(FieldSpecError::InvalidSettings(format!(
                    "zero_is_empty must be a boolean, got {other}"
                )))
            }
        };

        Ok(Self {
            field_type,
            choices,
            zero_is_empty,
        })
    }
}

/// Canonical form of a value as the remote would store it.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Text(String),
    Integer(i64),
    Float(f64),
    /// Untyped fields keep the caller's value.
    Raw(Value),
}

impl NormalizedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NormalizedValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The JSON value to send. Non-finite floats have no JSON form and become
    /// `null`.
    pub fn to_value(&self) -> Value {
        match self {
            NormalizedValue::Text(text) => Value::String(text.clone()),
            NormalizedValue::Integer(n) => Value::from(*n),
            NormalizedValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            NormalizedValue::Raw(value) => value.clone(),
        }
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Text(text) => f.write_str(text),
            NormalizedValue::Integer(n) => write!(f, "{n}"),
            NormalizedValue::Float(x) => f.write_str(&float_text(*x)),
            NormalizedValue::Raw(value) => write!(f, "{value}"),
        }
    }
}

/// Where a value being tested for emptiness comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrigin {
    /// Supplied by the caller, about to be sent.
    Item,
    /// Already stored remotely.
    Remote,
}

/// Normalizer bound to a reference timezone for date fields.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    zone: FixedOffset,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self { zone: utc() }
    }
}

impl Normalizer {
    pub fn new(zone: FixedOffset) -> Self {
        Self { zone }
    }

    /// Offset east of UTC in seconds; out-of-range offsets fall back to UTC.
    pub fn with_offset_seconds(seconds: i32) -> Self {
        Self {
            zone: FixedOffset::east_opt(seconds).unwrap_or_else(utc),
        }
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    pub fn normalize(&self, value: &Value, spec: &FieldSpec) -> NormalizedValue {
        let Some(field_type) = spec.field_type else {
            return NormalizedValue::Raw(value.clone());
        };
        match field_type {
            FieldType::Text | FieldType::Email => NormalizedValue::Text(scalar_text(value)),
            FieldType::Select => {
                let text = scalar_text(value);
                if spec.choices.iter().any(|choice| *choice == text) {
                    NormalizedValue::Text(text)
                } else {
                    NormalizedValue::Text(String::new())
                }
            }
            FieldType::Integer => NormalizedValue::Integer(to_integer(value)),
            FieldType::Float => NormalizedValue::Float(to_float(value)),
            FieldType::Date | FieldType::DateTime | FieldType::EmptyDate | FieldType::EmptyDateTime => {
                NormalizedValue::Text(self.date_text(value, field_type))
            }
        }
    }

    pub fn is_empty(&self, value: &Value, spec: &FieldSpec, origin: ValueOrigin) -> bool {
        let Some(field_type) = spec.field_type else {
            return match value {
                Value::Null => true,
                Value::Bool(flag) => !flag,
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                Value::Number(_) => false,
            };
        };
        let zero_counts = origin == ValueOrigin::Remote || spec.zero_is_empty;
        match self.normalize(value, spec) {
            NormalizedValue::Integer(n) => zero_counts && n == 0,
            NormalizedValue::Float(x) => zero_counts && x == 0.0,
            NormalizedValue::Text(text) => text == field_type.zero_date(),
            NormalizedValue::Raw(_) => false,
        }
    }

    /// Whether writing `new` over `current` would change the stored value.
    pub fn needs_update(&self, new: &Value, current: &Value, spec: &FieldSpec) -> bool {
        self.normalize(new, spec) != self.normalize(current, spec)
    }

    fn date_text(&self, value: &Value, field_type: FieldType) -> String {
        let zero = field_type.zero_date().to_string();
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(_) | Value::Bool(true) => scalar_text(value),
            Value::Null | Value::Bool(false) | Value::Array(_) | Value::Object(_) => return zero,
        };
        if text.is_empty() || text.starts_with("0000-00-00") {
            return zero;
        }
        let Some(parsed) = parse_lenient(&text, self.zone) else {
            return zero;
        };
        if parsed.year() < 0 {
            return zero;
        }
        match field_type {
            FieldType::Date | FieldType::EmptyDate => parsed.format("%Y-%m-%d").to_string(),
            _ => parsed.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// `Normalizer::normalize` in UTC.
pub fn normalize(value: &Value, spec: &FieldSpec) -> NormalizedValue {
    Normalizer::default().normalize(value, spec)
}

/// `Normalizer::is_empty` in UTC.
pub fn is_empty(value: &Value, spec: &FieldSpec, origin: ValueOrigin) -> bool {
    Normalizer::default().is_empty(value, spec, origin)
}

/// `Normalizer::needs_update` in UTC.
pub fn needs_update(new: &Value, current: &Value, spec: &FieldSpec) -> bool {
    Normalizer::default().needs_update(new, current, spec)
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// String form of a scalar; non-scalars and null become "".
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => float_text(n.as_f64().unwrap_or(0.0)),
        },
        _ => String::new(),
    }
}

/// Float to string: integral values without a fraction, exponent notation
/// outside 1e-4..1e15 as `1.0E+25`.
fn float_text(x: f64) -> String {
    if x.is_nan() {
        return "NAN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let magnitude = x.abs();
    if (1e-4..1e15).contains(&magnitude) {
        return format!("{x}");
    }
    let formatted = format!("{x:e}");
    let (mantissa, exponent) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
    let mantissa = if mantissa.contains('.') {
        mantissa.to_string()
    } else {
        format!("{mantissa}.0")
    };
    let exponent = match exponent.strip_prefix('-') {
        Some(digits) => format!("-{digits}"),
        None => format!("+{exponent}"),
    };
    format!("{mantissa}E{exponent}")
}

enum Numeric {
    Int(i64),
    Float(f64),
}

/// The leading numeric literal of a string, after leading whitespace.
fn leading_number(s: &str) -> Option<Numeric> {
    let s = s.trim_start_matches([' ', '\t', '\n', '\r', '\x0B', '\x0C']);
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    let mut is_float = false;
    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac_end = end + 1;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        let frac_digits = frac_end - end - 1;
        if frac_digits > 0 {
            digits += frac_digits;
            end = frac_end;
            is_float = true;
        }
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
            is_float = true;
        }
    }

    let literal = &s[..end];
    if is_float {
        return literal.parse::<f64>().ok().map(Numeric::Float);
    }
    match literal.parse::<i64>() {
        Ok(n) => Some(Numeric::Int(n)),
        Err(_) if literal.starts_with('-') => Some(Numeric::Int(i64::MIN)),
        Err(_) => Some(Numeric::Int(i64::MAX)),
    }
}

fn float_to_integer(x: f64) -> i64 {
    if x.is_finite() {
        x.trunc() as i64
    } else {
        0
    }
}

fn to_integer(value: &Value) -> i64 {
    match value {
        Value::Null | Value::Bool(false) => 0,
        Value::Bool(true) => 1,
        Value::Number(n) => n
            .as_i64()
            .unwrap_or_else(|| n.as_u64().map_or_else(|| float_to_integer(n.as_f64().unwrap_or(0.0)), |_| i64::MAX)),
        Value::String(s) => match leading_number(s) {
            Some(Numeric::Int(n)) => n,
            Some(Numeric::Float(x)) => float_to_integer(x),
            None => 0,
        },
        Value::Array(items) => i64::from(!items.is_empty()),
        Value::Object(map) => i64::from(!map.is_empty()),
    }
}

fn to_float(value: &Value) -> f64 {
    match value {
        Value::Null | Value::Bool(false) => 0.0,
        Value::Bool(true) => 1.0,
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => match leading_number(s) {
            Some(Numeric::Int(n)) => n as f64,
            Some(Numeric::Float(x)) => x,
            None => 0.0,
        },
        Value::Array(items) => f64::from(u8::from(!items.is_empty())),
        Value::Object(map) => f64::from(u8::from(!map.is_empty())),
    }
}
