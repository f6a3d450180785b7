// Pure operator functions, one module per operand domain
//
// Nothing in here touches the run context or reports errors: callers hand in already-typed
// arguments and get a boolean back.

pub mod string {
    use regex::Regex;

    pub fn equals(subject: &str, term: &str) -> bool {
        subject == term
    }

    pub fn contains(subject: &str, term: &str) -> bool {
        subject.contains(term)
    }

    pub fn starts_with(subject: &str, term: &str) -> bool {
        subject.starts_with(term)
    }

    pub fn ends_with(subject: &str, term: &str) -> bool {
        subject.ends_with(term)
    }

    pub fn length_equals(subject: &str, length: f64) -> bool {
        subject.chars().count() as f64 == length
    }

    pub fn length_greater_than(subject: &str, length: f64) -> bool {
        subject.chars().count() as f64 > length
    }

    pub fn length_less_than(subject: &str, length: f64) -> bool {
        (subject.chars().count() as f64) < length
    }

    pub fn matches_regex(subject: &str, pattern: &Regex) -> bool {
        pattern.is_match(subject)
    }
}

pub mod number {
    pub fn equals(value: f64, other: f64) -> bool {
        value == other
    }

    pub fn greater_than(value: f64, other: f64) -> bool {
        value > other
    }

    pub fn less_than(value: f64, other: f64) -> bool {
        value < other
    }

    /// Within `threshold` of `target`, inclusive
    pub fn around(value: f64, target: f64, threshold: f64) -> bool {
        (value - target).abs() <= threshold
    }

    pub fn is_negative(value: f64) -> bool {
        value < 0.0
    }

    pub fn is_zero(value: f64) -> bool {
        value == 0.0
    }

    pub fn is_decimal(value: f64) -> bool {
        value.fract() != 0.0
    }

    /// Number of digits after the decimal point in a textual representation
    ///
    /// Integers (no point, or only zeros after it as produced by float formatting of whole
    /// numbers) have precision 0.
    pub fn precision_of(representation: &str) -> u32 {
        let mantissa = representation
            .trim()
            .split(['e', 'E'])
            .next()
            .unwrap_or_default();
        match mantissa.split_once('.') {
            Some((_, fraction)) if fraction.chars().any(|c| c != '0') => {
                fraction.chars().take_while(|c| c.is_ascii_digit()).count() as u32
            }
            _ => 0,
        }
    }

    pub fn is_precision(representation: &str, precision: f64) -> bool {
        precision_of(representation) as f64 == precision
    }

    /// Exclusive on both bounds: a value equal to `min` or `max` is not between them
    pub fn between(value: f64, min: f64, max: f64) -> bool {
        value > min && value < max
    }

    pub fn is_even(value: f64) -> bool {
        value % 2.0 == 0.0
    }

    /// False for a zero divisor
    pub fn is_divisible_by(value: f64, divisor: f64) -> bool {
        divisor != 0.0 && value % divisor == 0.0
    }

    /// False for a zero base
    pub fn is_multiple_of(value: f64, base: f64) -> bool {
        base != 0.0 && value % base == 0.0
    }

    /// `factor` divides `value`; false for a zero factor
    pub fn is_factor_of(factor: f64, value: f64) -> bool {
        factor != 0.0 && value % factor == 0.0
    }
}

pub mod date {
    use chrono::{DateTime, Utc};

    pub fn equals(date: DateTime<Utc>, other: DateTime<Utc>) -> bool {
        date == other
    }

    pub fn before(date: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
        date < reference
    }

    pub fn after(date: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
        date > reference
    }

    /// Exclusive on both bounds
    pub fn between(date: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        date > start && date < end
    }
}

pub mod array {
    use crate::rules::literal::values_equal;
    use serde_json::Value;

    pub fn contains(items: &[Value], needle: &Value) -> bool {
        items.iter().any(|item| values_equal(item, needle))
    }

    pub fn equals(items: &[Value], other: &[Value]) -> bool {
        items.len() == other.len() && items.iter().zip(other).all(|(a, b)| values_equal(a, b))
    }

    pub fn length_greater_than(items: &[Value], length: f64) -> bool {
        items.len() as f64 > length
    }

    pub fn length_equals(items: &[Value], length: f64) -> bool {
        items.len() as f64 == length
    }

    pub fn length_less_than(items: &[Value], length: f64) -> bool {
        (items.len() as f64) < length
    }

    /// Exclusive on both bounds
    pub fn length_between(items: &[Value], min: f64, max: f64) -> bool {
        let length = items.len() as f64;
        length > min && length < max
    }

    /// At least one element satisfies the predicate
    pub fn satisfies(items: &[Value], predicate: impl Fn(&Value) -> bool) -> bool {
        items.iter().any(predicate)
    }
}

pub mod object {
    use crate::rules::literal::values_equal;
    use serde_json::{Map, Value};

    pub fn equals(object: &Map<String, Value>, other: &Map<String, Value>) -> bool {
        values_equal(&Value::Object(object.clone()), &Value::Object(other.clone()))
    }

    pub fn contains(object: &Map<String, Value>, key: &str) -> bool {
        object.contains_key(key)
    }

    /// At least one entry satisfies the predicate
    pub fn satisfies(object: &Map<String, Value>, predicate: impl Fn(&str, &Value) -> bool) -> bool {
        object.iter().any(|(key, value)| predicate(key.as_str(), value))
    }
}

pub mod json {
    use crate::rules::literal::values_equal;
    use serde_json::Value;

    /// Parse a document; strings are parsed, anything else is already structured
    pub fn parse(document: &Value) -> Option<Value> {
        match document {
            Value::String(text) => serde_json::from_str(text).ok(),
            other => Some(other.clone()),
        }
    }

    /// Parse-then-compare; a document that does not parse is never equal
    pub fn equals(document: &Value, other: &Value) -> bool {
        match (parse(document), parse(other)) {
            (Some(a), Some(b)) => values_equal(&a, &b),
            _ => false,
        }
    }

    pub fn satisfies(document: &Value, predicate: impl Fn(&Value) -> bool) -> bool {
        parse(document).is_some_and(|parsed| predicate(&parsed))
    }
}

pub mod common {
    use serde_json::Value;

    pub fn and(operands: &[bool]) -> bool {
        operands.iter().all(|operand| *operand)
    }

    pub fn or(operands: &[bool]) -> bool {
        operands.iter().any(|operand| *operand)
    }

    pub fn assert(value: bool) -> bool {
        value
    }

    pub fn assert_not(value: bool) -> bool {
        !value
    }

    /// `None` when emptiness is meaningless for the value's type
    pub fn is_empty(value: &Value) -> Option<bool> {
        match value {
            Value::String(text) => Some(text.is_empty()),
            Value::Array(items) => Some(items.is_empty()),
            Value::Object(map) => Some(map.is_empty()),
            _ => None,
        }
    }

    pub fn is_null(value: &Value) -> bool {
        value.is_null()
    }

    /// JSON numbers are never NaN; a string spelling NaN is
    pub fn is_nan(value: &Value) -> bool {
        match value {
            Value::String(text) => text.trim().parse::<f64>().is_ok_and(f64::is_nan),
            _ => false,
        }
    }

    pub fn exists(value: &Value) -> bool {
        !value.is_null()
    }
}
