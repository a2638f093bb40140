//! Builtin functions callable from routine scripts
//!
//! Calls are resolved by name at load time; an unknown name or wrong
//! argument count is a load failure, never a runtime one.

use std::time::{Duration, Instant};

use serde_json::Value;

use super::value::{as_number, count, number, type_name, values_equal, MAX_EXACT_INT};

/// Builtin functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `sleep(seconds)` blocks the routine thread
    Sleep,
    /// `fail(message)` raises a routine error
    Fail,
    /// `log(value)` emits an info event
    Log,
    /// `len(list | object | string)`
    Len,
    /// `str(value)`
    Str,
    /// `num(value)` parses strings, passes numbers through
    Num,
    /// `range(n)` or `range(start, end)`
    Range,
    /// `push(list, value)` returns a new list
    Push,
    /// `keys(object)`
    Keys,
    /// `contains(list | object | string, value)`
    Contains,
    /// `abs(x)`
    Abs,
    /// `sqrt(x)`
    Sqrt,
    /// `floor(x)`
    Floor,
    /// `min(a, b)`
    Min,
    /// `max(a, b)`
    Max,
    /// `clock()` seconds since the routine started
    Clock,
    /// `__panic(message)` unwinds the routine thread
    #[cfg(test)]
    Panic,
}

/// Longest list `range` will materialize.
const MAX_RANGE: f64 = 10_000_000.0;

impl Builtin {
    /// Resolve a builtin by its script name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        let builtin = match name {
            "sleep" => Self::Sleep,
            "fail" => Self::Fail,
            "log" => Self::Log,
            "len" => Self::Len,
            "str" => Self::Str,
            "num" => Self::Num,
            "range" => Self::Range,
            "push" => Self::Push,
            "keys" => Self::Keys,
            "contains" => Self::Contains,
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "floor" => Self::Floor,
            "min" => Self::Min,
            "max" => Self::Max,
            "clock" => Self::Clock,
            #[cfg(test)]
            "__panic" => Self::Panic,
            _ => return None,
        };
        Some(builtin)
    }

    /// Script name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Fail => "fail",
            Self::Log => "log",
            Self::Len => "len",
            Self::Str => "str",
            Self::Num => "num",
            Self::Range => "range",
            Self::Push => "push",
            Self::Keys => "keys",
            Self::Contains => "contains",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Floor => "floor",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clock => "clock",
            #[cfg(test)]
            Self::Panic => "__panic",
        }
    }

    /// Accepted argument counts (inclusive).
    #[must_use]
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Clock => (0, 0),
            Self::Range => (1, 2),
            Self::Push | Self::Contains | Self::Min | Self::Max => (2, 2),
            _ => (1, 1),
        }
    }

    /// Apply the builtin to evaluated arguments.
    ///
    /// `started` is when the current invocation began. Errors are the
    /// message of the routine error to raise.
    pub(crate) fn call(self, args: Vec<Value>, started: Instant) -> Result<Value, String> {
        let mut args = args.into_iter();
        let mut arg = || args.next().unwrap_or(Value::Null);

        match self {
            Self::Sleep => {
                let secs = as_number(&arg(), "sleep")?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(format!("sleep: invalid duration {secs}"));
                }
                // Overlong sleeps saturate; the deadline decides when to give up.
                let duration = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
                std::thread::sleep(duration);
                Ok(Value::Null)
            }
            Self::Fail => Err(match arg() {
                Value::String(message) => message,
                other => other.to_string(),
            }),
            Self::Log => {
                let value = arg();
                match &value {
                    Value::String(message) => tracing::info!(target: "routine", "{message}"),
                    other => tracing::info!(target: "routine", "{other}"),
                }
                Ok(Value::Null)
            }
            Self::Len => {
                let len = match arg() {
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    Value::String(s) => s.chars().count(),
                    other => return Err(format!("len: unsupported type {}", type_name(&other))),
                };
                number(count(len))
            }
            Self::Str => Ok(Value::String(match arg() {
                Value::String(s) => s,
                other => other.to_string(),
            })),
            Self::Num => match arg() {
                Value::Number(n) => Ok(Value::Number(n)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("num: cannot parse {s:?}"))
                    .and_then(number),
                Value::Bool(b) => number(if b { 1.0 } else { 0.0 }),
                other => Err(format!("num: unsupported type {}", type_name(&other))),
            },
            Self::Range => {
                let first = as_number(&arg(), "range")?;
                let (start, end) = match arg() {
                    Value::Null => (0.0, first),
                    second => (first, as_number(&second, "range")?),
                };
                if start.abs() > MAX_EXACT_INT || end.abs() > MAX_EXACT_INT {
                    return Err(format!("range: bound magnitude exceeds {MAX_EXACT_INT}"));
                }
                if end - start > MAX_RANGE {
                    return Err(format!("range: more than {MAX_RANGE} elements"));
                }
                let mut items = Vec::new();
                let mut i = start.floor();
                while i < end {
                    items.push(number(i)?);
                    i += 1.0;
                }
                Ok(Value::Array(items))
            }
            Self::Push => match arg() {
                Value::Array(mut items) => {
                    items.push(arg());
                    Ok(Value::Array(items))
                }
                other => Err(format!("push: expected list, got {}", type_name(&other))),
            },
            Self::Keys => match arg() {
                Value::Object(map) => Ok(Value::Array(
                    map.keys().cloned().map(Value::String).collect(),
                )),
                other => Err(format!("keys: expected object, got {}", type_name(&other))),
            },
            Self::Contains => {
                let haystack = arg();
                let needle = arg();
                let found = match (&haystack, &needle) {
                    (Value::Array(items), _) => items.iter().any(|v| values_equal(v, &needle)),
                    (Value::Object(map), Value::String(key)) => map.contains_key(key),
                    (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
                    _ => {
                        return Err(format!(
                            "contains: unsupported types {} and {}",
                            type_name(&haystack),
                            type_name(&needle)
                        ))
                    }
                };
                Ok(Value::Bool(found))
            }
            Self::Abs => number(as_number(&arg(), "abs")?.abs()),
            Self::Sqrt => {
                let x = as_number(&arg(), "sqrt")?;
                if x < 0.0 {
                    return Err(format!("sqrt: negative argument {x}"));
                }
                number(x.sqrt())
            }
            Self::Floor => number(as_number(&arg(), "floor")?.floor()),
            Self::Min => {
                let (a, b) = (as_number(&arg(), "min")?, as_number(&arg(), "min")?);
                number(a.min(b))
            }
            Self::Max => {
                let (a, b) = (as_number(&arg(), "max")?, as_number(&arg(), "max")?);
                number(a.max(b))
            }
            Self::Clock => number(started.elapsed().as_secs_f64()),
            #[cfg(test)]
            Self::Panic => panic!("{}", arg()),
        }
    }
}
