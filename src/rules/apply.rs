/// Typed dispatch from a parsed [`Operator`] to its operator function
///
/// `apply` extracts typed arguments from the resolved subject and the (already coerced)
/// literal; a shape mismatch is reported as `TypeCoercion`, never as a panic.

use crate::error::EngineError;
use crate::rules::functions::{array, common, date, json, number, object, string};
use crate::rules::literal::{as_number, coerce, parse_date, type_name, values_equal, ValueType};
use crate::rules::operand::{
    ArrayOp, CommonOp, DateOp, JsonOp, NumberOp, ObjectOp, OperandDomain, Operator, StringOp,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Compiled MATCHES_REGEX patterns keyed by their source
static PATTERNS: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(Default::default);
const PATTERN_CACHE_LIMIT: usize = 256;

/// Nested predicate used as the literal of the SATISFIES operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateSpec {
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand: Option<OperandDomain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub value_type: ValueType,
}

/// A predicate with its operator parsed and literal coerced
#[derive(Debug, Clone)]
pub struct Predicate {
    operator: Operator,
    literal: Option<Value>,
}

impl Predicate {
    pub fn parse(literal: &Value) -> Result<Self, EngineError> {
        let spec: PredicateSpec = serde_json::from_value(literal.clone())
            .map_err(|_| EngineError::coercion("predicate {operator, value}", type_name(literal)))?;
        let operator = Operator::parse(&spec.operator, spec.operand, spec.value_type)?;
        if !operator.arity().accepts(spec.value.is_some()) {
            return Err(EngineError::invalid(format!(
                "predicate operator {} has the wrong number of arguments",
                operator
            )));
        }
        let literal = spec
            .value
            .as_ref()
            .map(|value| coerce(value, spec.value_type))
            .transpose()?;
        Ok(Self { operator, literal })
    }

    /// Errors inside a nested predicate count as "not satisfied"
    pub fn test(&self, subject: &Value) -> bool {
        apply(self.operator, subject, self.literal.as_ref()).unwrap_or(false)
    }
}

/// Apply `operator` to a resolved subject and an optional coerced literal
pub fn apply(operator: Operator, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    match operator {
        Operator::String(op) => apply_string(op, subject, literal),
        Operator::Number(op) => apply_number(op, subject, literal),
        Operator::Date(op) => apply_date(op, subject, literal),
        Operator::Array(op) => apply_array(op, subject, literal),
        Operator::Object(op) => apply_object(op, subject, literal),
        Operator::Json(op) => apply_json(op, subject, literal),
        Operator::Common(op) => apply_common(op, subject, literal),
    }
}

fn apply_string(op: StringOp, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    let subject = text(subject)?;
    let literal = required(literal)?;

    Ok(match op {
        StringOp::Equals => string::equals(subject, text(literal)?),
        StringOp::Contains => string::contains(subject, text(literal)?),
        StringOp::StartsWith => string::starts_with(subject, text(literal)?),
        StringOp::EndsWith => string::ends_with(subject, text(literal)?),
        StringOp::LengthEquals => string::length_equals(subject, numeric(literal)?),
        StringOp::LengthGreaterThan => string::length_greater_than(subject, numeric(literal)?),
        StringOp::LengthLessThan => string::length_less_than(subject, numeric(literal)?),
        StringOp::MatchesRegex => {
            let pattern = compiled_pattern(text(literal)?)?;
            string::matches_regex(subject, &pattern)
        }
    })
}

/// Compile once per distinct pattern; the cache starts over when full
fn compiled_pattern(source: &str) -> Result<Regex, EngineError> {
    if let Some(pattern) = PATTERNS.read().ok().and_then(|cache| cache.get(source).cloned()) {
        return Ok(pattern);
    }

    let pattern =
        Regex::new(source).map_err(|e| EngineError::coercion("regular expression", e.to_string()))?;
    if let Ok(mut cache) = PATTERNS.write() {
        if cache.len() >= PATTERN_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(source.to_string(), pattern.clone());
    }
    Ok(pattern)
}

fn apply_number(op: NumberOp, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    let value = numeric(subject)?;

    Ok(match op {
        NumberOp::IsNegative => number::is_negative(value),
        NumberOp::IsZero => number::is_zero(value),
        NumberOp::IsDecimal => number::is_decimal(value),
        NumberOp::IsEven => number::is_even(value),
        NumberOp::Equals => number::equals(value, numeric(required(literal)?)?),
        NumberOp::GreaterThan => number::greater_than(value, numeric(required(literal)?)?),
        NumberOp::LessThan => number::less_than(value, numeric(required(literal)?)?),
        NumberOp::Around => {
            let range = required(literal)?;
            number::around(
                value,
                numeric(member(range, "target")?)?,
                numeric(member(range, "threshold")?)?,
            )
        }
        NumberOp::IsPrecision => {
            let representation = match subject {
                Value::String(raw) => raw.clone(),
                Value::Number(n) if n.is_f64() => value.to_string(),
                other => other.to_string(),
            };
            number::is_precision(&representation, numeric(required(literal)?)?)
        }
        NumberOp::Between => {
            let range = required(literal)?;
            number::between(
                value,
                numeric(member(range, "min")?)?,
                numeric(member(range, "max")?)?,
            )
        }
        NumberOp::IsDivisibleBy => number::is_divisible_by(value, numeric(required(literal)?)?),
        NumberOp::IsMultipleOf => number::is_multiple_of(value, numeric(required(literal)?)?),
        NumberOp::IsFactorOf => number::is_factor_of(value, numeric(required(literal)?)?),
    })
}

fn apply_date(op: DateOp, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    let subject = datetime(subject)?;
    let literal = required(literal)?;

    Ok(match op {
        DateOp::Equals => date::equals(subject, datetime(literal)?),
        DateOp::Before => date::before(subject, datetime(literal)?),
        DateOp::After => date::after(subject, datetime(literal)?),
        DateOp::Between => date::between(
            subject,
            datetime(member(literal, "start")?)?,
            datetime(member(literal, "end")?)?,
        ),
    })
}

fn apply_array(op: ArrayOp, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    let items = subject
        .as_array()
        .ok_or_else(|| EngineError::coercion("array", type_name(subject)))?;
    let literal = required(literal)?;

    Ok(match op {
        ArrayOp::Contains => array::contains(items, literal),
        ArrayOp::Equals => {
            let other = literal
                .as_array()
                .ok_or_else(|| EngineError::coercion("array", type_name(literal)))?;
            array::equals(items, other)
        }
        ArrayOp::LengthGreaterThan => array::length_greater_than(items, numeric(literal)?),
        ArrayOp::LengthEquals => array::length_equals(items, numeric(literal)?),
        ArrayOp::LengthLessThan => array::length_less_than(items, numeric(literal)?),
        ArrayOp::LengthBetween => array::length_between(
            items,
            numeric(member(literal, "min")?)?,
            numeric(member(literal, "max")?)?,
        ),
        ArrayOp::Satisfies => {
            let predicate = Predicate::parse(literal)?;
            array::satisfies(items, |item| predicate.test(item))
        }
    })
}

fn apply_object(op: ObjectOp, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    let map = subject
        .as_object()
        .ok_or_else(|| EngineError::coercion("object", type_name(subject)))?;
    let literal = required(literal)?;

    Ok(match op {
        ObjectOp::Equals => {
            let other = literal
                .as_object()
                .ok_or_else(|| EngineError::coercion("object", type_name(literal)))?;
            object::equals(map, other)
        }
        ObjectOp::Contains => object::contains(map, text(literal)?),
        ObjectOp::Satisfies => {
            let predicate = Predicate::parse(literal)?;
            object::satisfies(map, |_, value| predicate.test(value))
        }
    })
}

fn apply_json(op: JsonOp, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    let literal = required(literal)?;

    Ok(match op {
        JsonOp::Equals => json::equals(subject, literal),
        JsonOp::Satisfies => {
            let predicate = Predicate::parse(literal)?;
            json::satisfies(subject, |document| predicate.test(document))
        }
    })
}

fn apply_common(op: CommonOp, subject: &Value, literal: Option<&Value>) -> Result<bool, EngineError> {
    Ok(match op {
        CommonOp::Assert => common::assert(boolean(subject)?),
        CommonOp::AssertNot => common::assert_not(boolean(subject)?),
        CommonOp::IsEmpty => common::is_empty(subject)
            .ok_or_else(|| EngineError::coercion("string, array or object", type_name(subject)))?,
        CommonOp::IsNull => common::is_null(subject),
        CommonOp::IsNan => common::is_nan(subject),
        CommonOp::IsUndefined => false,
        CommonOp::Exists => common::exists(subject),
        CommonOp::And => common::and(&logical_operands(subject, literal)?),
        CommonOp::Or => common::or(&logical_operands(subject, literal)?),
        CommonOp::Equals => values_equal(subject, required(literal)?),
    })
}

/// Subject and literal flattened into one operand list (either may be a bool or a list of bools)
fn logical_operands(subject: &Value, literal: Option<&Value>) -> Result<Vec<bool>, EngineError> {
    let mut operands = Vec::new();
    for source in std::iter::once(subject).chain(literal) {
        match source {
            Value::Array(items) => {
                for item in items {
                    operands.push(boolean(item)?);
                }
            }
            other => operands.push(boolean(other)?),
        }
    }
    Ok(operands)
}

fn required(literal: Option<&Value>) -> Result<&Value, EngineError> {
    literal.ok_or_else(|| EngineError::coercion("comparison literal", "none"))
}

fn member<'a>(range: &'a Value, key: &str) -> Result<&'a Value, EngineError> {
    range
        .get(key)
        .ok_or_else(|| EngineError::coercion(format!("object with '{}'", key), type_name(range)))
}

fn text(value: &Value) -> Result<&str, EngineError> {
    value
        .as_str()
        .ok_or_else(|| EngineError::coercion("string", type_name(value)))
}

fn numeric(value: &Value) -> Result<f64, EngineError> {
    as_number(value).ok_or_else(|| EngineError::coercion("number", type_name(value)))
}

fn boolean(value: &Value) -> Result<bool, EngineError> {
    value
        .as_bool()
        .ok_or_else(|| EngineError::coercion("boolean", type_name(value)))
}

fn datetime(value: &Value) -> Result<DateTime<Utc>, EngineError> {
    parse_date(value).ok_or_else(|| EngineError::coercion("date", type_name(value)))
}
