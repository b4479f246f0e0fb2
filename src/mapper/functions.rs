//! Builtin functions callable from mapping expressions.
//!
//! The function table is closed: an expression can only call names present
//! in the [`FunctionRegistry`] handed to its evaluation scope, and a table is
//! never mutated once shared. Extension goes through
//! [`FunctionRegistry::with_function`], which consumes the registry by value
//! and returns the extended copy.
//!
//! [`FunctionRegistry::defaults`] provides the fixed baseline set:
//!
//! - `abs(number)` - absolute value, integers stay integers
//! - `len(string | array | object)` - character or element count
//! - `min(...)` / `max(...)` - smallest / largest of the arguments, or of a
//!   single array argument
//! - `round(number [, ndigits])` - round half to even
//! - `int(value)` / `float(value)` - numeric conversion from numbers,
//!   strings, and booleans
//! - `str(value)` - string rendering, containers render as compact JSON
//! - `bool(value)` - truthiness
//! - `lower(string)` / `upper(string)` / `title(string)` / `trim(string)` -
//!   string case and whitespace helpers
//!
//! [`FunctionRegistry::standard`] extends the baseline with `md5`, `os`, and
//! the `datetime` namespace (`datetime.now`, `datetime.utcnow`,
//! `datetime.today`, `datetime.timestamp`, `datetime.date_add`). The
//! `datetime` functions read time through an injected [`Clock`] so tests can
//! pin evaluation to a fixed instant.

use crate::mapper::expr::error::{EvalError, EvalResult};
use crate::mapper::expr::eval::{Num, as_num, compare_values, float_value, truthy, type_name};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use md5::{Digest, Md5};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A builtin callable: a pure function over already-evaluated argument
/// values.
pub type BuiltinFn = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

/// Wall-clock source for the `datetime` builtins.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    /// Read the process clock.
    System,
    /// Always report the given instant. Used to make `datetime` output
    /// deterministic in tests.
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(instant) => *instant,
        }
    }
}

/// The closed table of functions reachable from mapping expressions.
///
/// Cloning is cheap: entries are `Arc`-shared closures.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, BuiltinFn>,
}

impl FunctionRegistry {
    /// The fixed baseline set of value helpers. Contains no hashing, no
    /// environment access, and no clock access.
    pub fn defaults() -> Self {
        let mut registry = Self::default();

        registry.insert("abs", |args| {
            expect_args("abs", args, 1)?;
            match as_num(&args[0]) {
                Some(Num::Int(i)) => i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or(EvalError::IntegerOverflow),
                Some(Num::Float(x)) => float_value(x.abs()),
                None => Err(EvalError::type_mismatch(format!(
                    "abs() expects a number, got {}",
                    type_name(&args[0])
                ))),
            }
        });

        registry.insert("len", |args| {
            expect_args("len", args, 1)?;
            let count = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(EvalError::type_mismatch(format!(
                        "len() expects a string, array, or object, got {}",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::from(count as i64))
        });

        registry.insert("min", |args| {
            fold_extremum("min", args, |ordering| ordering != Ordering::Greater)
        });

        registry.insert("max", |args| {
            fold_extremum("max", args, |ordering| ordering != Ordering::Less)
        });

        registry.insert("round", round_builtin);

        registry.insert("int", |args| {
            expect_args("int", args, 1)?;
            match &args[0] {
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                Value::Number(_) => match as_num(&args[0]) {
                    Some(Num::Int(i)) => Ok(Value::from(i)),
                    Some(Num::Float(x)) => int_from_f64(x.trunc()),
                    None => Err(EvalError::IntegerOverflow),
                },
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| {
                    EvalError::type_mismatch(format!("int() cannot parse '{s}' as an integer"))
                }),
                other => Err(EvalError::type_mismatch(format!(
                    "int() expects a number, string, or bool, got {}",
                    type_name(other)
                ))),
            }
        });

        registry.insert("float", |args| {
            expect_args("float", args, 1)?;
            match &args[0] {
                Value::Bool(b) => float_value(if *b { 1.0 } else { 0.0 }),
                Value::Number(_) => match as_num(&args[0]) {
                    Some(n) => float_value(n.as_f64()),
                    None => Err(EvalError::NonFiniteNumber),
                },
                Value::String(s) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| {
                        EvalError::type_mismatch(format!("float() cannot parse '{s}' as a number"))
                    })?;
                    float_value(parsed)
                }
                other => Err(EvalError::type_mismatch(format!(
                    "float() expects a number, string, or bool, got {}",
                    type_name(other)
                ))),
            }
        });

        registry.insert("str", |args| {
            expect_args("str", args, 1)?;
            let rendered = match &args[0] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(Value::String(rendered))
        });

        registry.insert("bool", |args| {
            expect_args("bool", args, 1)?;
            Ok(Value::Bool(truthy(&args[0])))
        });

        registry.insert("lower", |args| {
            Ok(Value::String(expect_string("lower", args)?.to_lowercase()))
        });

        registry.insert("upper", |args| {
            Ok(Value::String(expect_string("upper", args)?.to_uppercase()))
        });

        registry.insert("title", |args| {
            Ok(Value::String(title_case(expect_string("title", args)?)))
        });

        registry.insert("trim", |args| {
            Ok(Value::String(expect_string("trim", args)?.trim().to_string()))
        });

        registry
    }

    /// The baseline set plus `md5`, `os`, and the `datetime` namespace,
    /// reading time from `clock`.
    pub fn standard(clock: Clock) -> Self {
        let mut registry = Self::defaults();

        registry.insert("md5", |args| {
            let input = expect_string("md5", args)?;
            let mut hasher = Md5::new();
            hasher.update(input.as_bytes());
            Ok(Value::String(format!("{:x}", hasher.finalize())))
        });

        registry.insert("os", |args| {
            let name = expect_string("os", args)?;
            match std::env::var(name) {
                Ok(value) => Ok(Value::String(value)),
                Err(_) => Ok(Value::Null),
            }
        });

        registry.insert("datetime.now", move |args| {
            expect_args("datetime.now", args, 0)?;
            Ok(Value::String(rfc3339(clock.now())))
        });

        registry.insert("datetime.utcnow", move |args| {
            expect_args("datetime.utcnow", args, 0)?;
            Ok(Value::String(rfc3339(clock.now())))
        });

        registry.insert("datetime.today", move |args| {
            expect_args("datetime.today", args, 0)?;
            Ok(Value::String(clock.now().date_naive().to_string()))
        });

        registry.insert("datetime.timestamp", move |args| {
            expect_args("datetime.timestamp", args, 0)?;
            Ok(Value::from(clock.now().timestamp()))
        });

        registry.insert("datetime.date_add", |args| {
            expect_args("datetime.date_add", args, 2)?;
            let raw = args[0].as_str().ok_or_else(|| {
                EvalError::type_mismatch(format!(
                    "datetime.date_add() expects a date string, got {}",
                    type_name(&args[0])
                ))
            })?;
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                EvalError::type_mismatch(format!(
                    "datetime.date_add() cannot parse '{raw}' as a 'YYYY-MM-DD' date"
                ))
            })?;
            let days = match as_num(&args[1]) {
                Some(Num::Int(d)) => d,
                _ => {
                    return Err(EvalError::type_mismatch(format!(
                        "datetime.date_add() day count must be an integer, got {}",
                        type_name(&args[1])
                    )));
                }
            };
            let shifted = Duration::try_days(days)
                .and_then(|delta| date.checked_add_signed(delta))
                .ok_or_else(|| {
                    EvalError::type_mismatch("datetime.date_add() result is out of range")
                })?;
            Ok(Value::String(shifted.to_string()))
        });

        registry
    }

    /// Returns a copy of this registry with `name` bound to `function`,
    /// replacing any previous binding of that name.
    pub fn with_function(mut self, name: &str, function: BuiltinFn) -> Self {
        self.functions.insert(name.to_string(), function);
        self
    }

    /// Looks up a function by its registered (possibly dotted) name.
    pub fn get(&self, name: &str) -> Option<&BuiltinFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted for stable display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn insert(
        &mut self,
        name: &str,
        function: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) {
        self.functions.insert(name.to_string(), Arc::new(function));
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

fn expect_args(function: &str, args: &[Value], expected: usize) -> EvalResult<()> {
    if args.len() != expected {
        return Err(EvalError::Arity {
            function: function.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

fn expect_string<'a>(function: &str, args: &'a [Value]) -> EvalResult<&'a str> {
    expect_args(function, args, 1)?;
    args[0].as_str().ok_or_else(|| {
        EvalError::type_mismatch(format!(
            "{}() expects a string, got {}",
            function,
            type_name(&args[0])
        ))
    })
}

/// Shared fold for `min` and `max`. A single array argument is folded over
/// its elements; ties keep the earlier value.
fn fold_extremum(
    function: &str,
    args: &[Value],
    keep_left: fn(Ordering) -> bool,
) -> EvalResult<Value> {
    if args.is_empty() {
        return Err(EvalError::Arity {
            function: function.to_string(),
            expected: "at least 1".to_string(),
            got: 0,
        });
    }
    let items: &[Value] = match args {
        [Value::Array(items)] => items,
        _ => args,
    };
    let mut best = match items.first() {
        Some(first) => first,
        None => {
            return Err(EvalError::type_mismatch(format!(
                "{function}() of an empty sequence"
            )));
        }
    };
    for candidate in &items[1..] {
        if !keep_left(compare_values(best, candidate)?) {
            best = candidate;
        }
    }
    Ok(best.clone())
}

fn round_builtin(args: &[Value]) -> EvalResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(EvalError::Arity {
            function: "round".to_string(),
            expected: "1 or 2".to_string(),
            got: args.len(),
        });
    }
    let value = as_num(&args[0]).ok_or_else(|| {
        EvalError::type_mismatch(format!(
            "round() expects a number, got {}",
            type_name(&args[0])
        ))
    })?;
    if args.len() == 1 {
        return match value {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(x) => int_from_f64(x.round_ties_even()),
        };
    }
    let digits = match as_num(&args[1]) {
        Some(Num::Int(d)) => d,
        _ => {
            return Err(EvalError::type_mismatch(format!(
                "round() digit count must be an integer, got {}",
                type_name(&args[1])
            )));
        }
    };
    match (value, digits) {
        (Num::Int(i), d) if d >= 0 => Ok(Value::from(i)),
        (Num::Int(i), d) => {
            let factor = 10f64.powi((-d).min(308) as i32);
            int_from_f64((i as f64 / factor).round_ties_even() * factor)
        }
        (Num::Float(x), d) => {
            let factor = 10f64.powi(d.clamp(-308, 308) as i32);
            float_value((x * factor).round_ties_even() / factor)
        }
    }
}

/// Casts a rounded float back to an integer, guarding the `i64` range.
fn int_from_f64(x: f64) -> EvalResult<Value> {
    if x < i64::MIN as f64 || x >= i64::MAX as f64 {
        return Err(EvalError::IntegerOverflow);
    }
    Ok(Value::from(x as i64))
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Title-casing in the source dialect's manner: each alphabetic run starts
/// upper-case and continues lower-case.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
