/// Literal coercion and value helpers shared by the operator functions

use crate::error::EngineError;
use crate::rules::operand::OperandDomain;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Declared type of a condition's comparison literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    #[default]
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    Json,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "STRING",
            ValueType::Number => "NUMBER",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Date => "DATE",
            ValueType::Array => "ARRAY",
            ValueType::Object => "OBJECT",
            ValueType::Json => "JSON",
        }
    }

    /// Domain used when an operator name is written without one
    pub fn default_domain(&self) -> OperandDomain {
        match self {
            ValueType::String => OperandDomain::String,
            ValueType::Number => OperandDomain::Number,
            ValueType::Boolean => OperandDomain::Common,
            ValueType::Date => OperandDomain::Date,
            ValueType::Array => OperandDomain::Array,
            ValueType::Object => OperandDomain::Object,
            ValueType::Json => OperandDomain::Json,
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::Number | ValueType::Boolean | ValueType::Date
        )
    }
}

/// Short description of a JSON value's type for diagnostics
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a stored literal to its declared type
///
/// Structured literals (range objects such as `{min, max}`, lists of operands) are coerced
/// member by member when the declared type is a scalar type.
pub fn coerce(value: &Value, value_type: ValueType) -> Result<Value, EngineError> {
    let mismatch = || EngineError::coercion(value_type.as_str(), describe(value));

    match (value_type, value) {
        (scalar, Value::Object(map)) if scalar.is_scalar() => {
            let mut coerced = serde_json::Map::with_capacity(map.len());
            for (key, member) in map {
                coerced.insert(key.clone(), coerce(member, scalar)?);
            }
            Ok(Value::Object(coerced))
        }
        (scalar, Value::Array(items)) if scalar.is_scalar() => items
            .iter()
            .map(|item| coerce(item, scalar))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),

        (ValueType::String, Value::String(_)) => Ok(value.clone()),
        (ValueType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (ValueType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (ValueType::Number, Value::Number(_)) => Ok(value.clone()),
        (ValueType::Number, Value::String(text)) => parse_number(text).ok_or_else(mismatch),

        (ValueType::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (ValueType::Boolean, Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },

        (ValueType::Date, Value::String(_) | Value::Number(_)) => parse_date(value)
            .map(|date| Value::String(date.to_rfc3339()))
            .ok_or_else(mismatch),

        (ValueType::Array, Value::Array(_)) => Ok(value.clone()),
        (ValueType::Array, Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ Value::Array(_)) => Ok(parsed),
            _ => Err(mismatch()),
        },

        (ValueType::Object, Value::Object(_)) => Ok(value.clone()),
        (ValueType::Object, Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            _ => Err(mismatch()),
        },

        // Raw JSON literals are compared after parsing, by the operator itself
        (ValueType::Json, _) => Ok(value.clone()),

        _ => Err(mismatch()),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(text) => format!("string \"{}\"", text),
        other => format!("{} {}", type_name(other), other),
    }
}

/// Parse a numeric string, keeping integers as integers
pub fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(int) = text.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Read a value as `f64`, accepting numeric strings
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parse RFC 3339 timestamps, `YYYY-MM-DD` dates, or epoch milliseconds
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// Deep equality where numbers compare by value (`1 == 1.0`)
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}
