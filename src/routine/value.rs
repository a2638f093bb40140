//! Value helpers for the interpreter
//!
//! Routine values are plain `serde_json::Value`s. Numbers are computed as
//! `f64` and stored as integers whenever they are integral and in range, so
//! `str(3)` renders `"3"` and results round-trip through the store as
//! ordinary JSON.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Largest integral magnitude stored as an integer.
pub const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Convert an `f64` into a JSON number value.
///
/// # Errors
///
/// Returns an error for NaN and infinities.
#[allow(clippy::cast_possible_truncation)]
pub fn number(x: f64) -> Result<Value, String> {
    if !x.is_finite() {
        return Err(format!("arithmetic produced a non-finite number ({x})"));
    }
    if x.fract() == 0.0 && x.abs() <= MAX_EXACT_INT {
        return Ok(Value::Number(Number::from(x as i64)));
    }
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| format!("number {x} is not representable"))
}

/// Lossy `usize` to `f64` for lengths.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn count(n: usize) -> f64 {
    n as f64
}

/// Read a number out of `value`, naming `context` in the error.
///
/// # Errors
///
/// Returns an error when `value` is not a number.
pub fn as_number(value: &Value, context: &str) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{context}: expected number, got {}", type_name(value)))
}

/// Script-level type name of a value.
#[must_use]
pub const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are false.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Structural equality that compares numbers by value (`1 == 1.0`).
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering for `<`-family operators: numbers with numbers, strings with strings.
#[must_use]
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
