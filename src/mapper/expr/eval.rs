//! Evaluator for compiled mapping expressions
//!
//! Stateless: every call reads only its arguments, so a compiled expression
//! can be shared and evaluated concurrently without synchronization. Values
//! are `serde_json::Value` end to end. Numbers follow the usual promotion
//! rules (integer arithmetic stays integral, any float operand promotes the
//! result), `and`/`or` return the deciding operand rather than a coerced
//! boolean, and truthiness treats null, false, zero, and empty containers
//! as false.

use super::ast::{BinOp, Expr, UnaryOp};
use super::error::{EvalError, EvalResult};
use crate::mapper::functions::FunctionRegistry;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Upper bound on the byte length of a string or list produced by the `*`
/// repetition operator, guarding against runaway allocations from
/// user-authored expressions.
const MAX_REPEAT_BYTES: usize = 100_000;

/// Evaluation bindings for one expression invocation.
///
/// Record fields are visible as top-level names. `named` carries auxiliary
/// bindings (`_`, `record`, `config`, `self`) which shadow record fields of
/// the same name. Functions are resolved only through the registry.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    record: &'a Map<String, Value>,
    named: &'a [(&'a str, &'a Value)],
    functions: &'a FunctionRegistry,
}

impl<'a> Scope<'a> {
    pub fn new(record: &'a Map<String, Value>, functions: &'a FunctionRegistry) -> Self {
        Self {
            record,
            named: &[],
            functions,
        }
    }

    pub fn with_named(
        record: &'a Map<String, Value>,
        named: &'a [(&'a str, &'a Value)],
        functions: &'a FunctionRegistry,
    ) -> Self {
        Self {
            record,
            named,
            functions,
        }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        self.functions
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.named
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .or_else(|| self.record.get(name))
    }
}

/// Evaluate a parsed expression against a scope.
pub fn evaluate(expr: &Expr, scope: &Scope) -> EvalResult<Value> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(n) => Ok(Value::from(*n)),
        Expr::Float(x) => float_value(*x),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, scope)?);
            }
            Ok(Value::Array(values))
        }
        Expr::Ident(name) => scope
            .lookup(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        Expr::Member { object, field } => {
            let object = evaluate(object, scope)?;
            member_access(&object, field)
        }
        Expr::Index { object, index } => {
            let object = evaluate(object, scope)?;
            let index = evaluate(index, scope)?;
            index_access(&object, &index)
        }
        Expr::Call { function, args } => {
            // Resolve the name before touching the arguments so that a call
            // to an unregistered function never evaluates anything.
            let builtin = scope
                .functions
                .get(function)
                .ok_or_else(|| EvalError::UnknownFunction(function.clone()))?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, scope)?);
            }
            builtin(&values)
        }
        Expr::Unary { op, operand } => {
            let operand = evaluate(operand, scope)?;
            eval_unary_op(*op, operand)
        }
        Expr::Binary { op, left, right } => match op {
            BinOp::And => {
                let left = evaluate(left, scope)?;
                if !truthy(&left) {
                    Ok(left)
                } else {
                    evaluate(right, scope)
                }
            }
            BinOp::Or => {
                let left = evaluate(left, scope)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    evaluate(right, scope)
                }
            }
            _ => {
                let left = evaluate(left, scope)?;
                let right = evaluate(right, scope)?;
                eval_binary_op(*op, left, right)
            }
        },
        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            if truthy(&evaluate(condition, scope)?) {
                evaluate(then_branch, scope)
            } else {
                evaluate(else_branch, scope)
            }
        }
    }
}

/// Truthiness: null, false, zero, and empty strings/arrays/objects are
/// false; everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i != 0
            } else if let Some(u) = n.as_u64() {
                u != 0
            } else {
                n.as_f64().is_some_and(|x| x != 0.0)
            }
        }
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// JSON-flavored type name for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(x) => x,
        }
    }
}

pub(crate) fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Num::Int(i))
            } else {
                n.as_f64().map(Num::Float)
            }
        }
        _ => None,
    }
}

pub(crate) fn float_value(x: f64) -> EvalResult<Value> {
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .ok_or(EvalError::NonFiniteNumber)
}

fn eval_unary_op(op: UnaryOp, operand: Value) -> EvalResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(&operand))),
        UnaryOp::Neg => match as_num(&operand) {
            Some(Num::Int(i)) => i
                .checked_neg()
                .map(Value::from)
                .ok_or(EvalError::IntegerOverflow),
            Some(Num::Float(x)) => float_value(-x),
            None => Err(EvalError::type_mismatch(format!(
                "cannot negate {}",
                type_name(&operand)
            ))),
        },
    }
}

pub(crate) fn eval_binary_op(op: BinOp, left: Value, right: Value) -> EvalResult<Value> {
    match op {
        BinOp::Add => add_values(left, right),
        BinOp::Mul => mul_values(left, right),
        BinOp::Sub | BinOp::Div | BinOp::Mod => arithmetic(op, left, right),
        BinOp::Eq => Ok(Value::Bool(value_eq(&left, &right))),
        BinOp::NotEq => Ok(Value::Bool(!value_eq(&left, &right))),
        BinOp::Lt => compare_values(&left, &right).map(|o| Value::Bool(o == Ordering::Less)),
        BinOp::Le => compare_values(&left, &right).map(|o| Value::Bool(o != Ordering::Greater)),
        BinOp::Gt => compare_values(&left, &right).map(|o| Value::Bool(o == Ordering::Greater)),
        BinOp::Ge => compare_values(&left, &right).map(|o| Value::Bool(o != Ordering::Less)),
        BinOp::In => membership(&left, &right).map(Value::Bool),
        BinOp::NotIn => membership(&left, &right).map(|found| Value::Bool(!found)),
        // Non-lazy forms; `evaluate` short-circuits these before we get here.
        BinOp::And => Ok(if !truthy(&left) { left } else { right }),
        BinOp::Or => Ok(if truthy(&left) { left } else { right }),
    }
}

fn add_values(left: Value, right: Value) -> EvalResult<Value> {
    if let (Some(l), Some(r)) = (as_num(&left), as_num(&right)) {
        return match (l, r) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Value::from)
                .ok_or(EvalError::IntegerOverflow),
            _ => float_value(l.as_f64() + r.as_f64()),
        };
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (left, right) => Err(EvalError::type_mismatch(format!(
            "cannot apply '+' to {} and {}",
            type_name(&left),
            type_name(&right)
        ))),
    }
}

fn mul_values(left: Value, right: Value) -> EvalResult<Value> {
    if let (Some(l), Some(r)) = (as_num(&left), as_num(&right)) {
        return match (l, r) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_mul(b)
                .map(Value::from)
                .ok_or(EvalError::IntegerOverflow),
            _ => float_value(l.as_f64() * r.as_f64()),
        };
    }
    match (&left, &right) {
        (Value::String(s), Value::Number(_)) => repeat_string(s, &right),
        (Value::Number(_), Value::String(s)) => repeat_string(s, &left),
        _ => Err(EvalError::type_mismatch(format!(
            "cannot apply '*' to {} and {}",
            type_name(&left),
            type_name(&right)
        ))),
    }
}

fn repeat_string(s: &str, count: &Value) -> EvalResult<Value> {
    let n = match as_num(count) {
        Some(Num::Int(i)) => i,
        _ => {
            return Err(EvalError::type_mismatch(
                "string repetition count must be an integer",
            ));
        }
    };
    if n <= 0 {
        return Ok(Value::String(String::new()));
    }
    let total = s.len().saturating_mul(n as usize);
    if total > MAX_REPEAT_BYTES {
        return Err(EvalError::OversizedResult);
    }
    Ok(Value::String(s.repeat(n as usize)))
}

fn arithmetic(op: BinOp, left: Value, right: Value) -> EvalResult<Value> {
    let (l, r) = match (as_num(&left), as_num(&right)) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return Err(EvalError::type_mismatch(format!(
                "cannot apply '{}' to {} and {}",
                op.as_str(),
                type_name(&left),
                type_name(&right)
            )));
        }
    };
    match op {
        BinOp::Sub => match (l, r) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_sub(b)
                .map(Value::from)
                .ok_or(EvalError::IntegerOverflow),
            _ => float_value(l.as_f64() - r.as_f64()),
        },
        // Division always yields a float, as in the source dialect.
        BinOp::Div => {
            if r.as_f64() == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            float_value(l.as_f64() / r.as_f64())
        }
        BinOp::Mod => modulo(l, r),
        _ => Err(EvalError::type_mismatch(format!(
            "'{}' is not an arithmetic operator",
            op.as_str()
        ))),
    }
}

/// Modulo with the sign of the divisor, matching the configuration
/// dialect's semantics: `-7 % 3 == 2`, `7 % -3 == -2`.
fn modulo(l: Num, r: Num) -> EvalResult<Value> {
    match (l, r) {
        (Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let rem = a.checked_rem(b).ok_or(EvalError::IntegerOverflow)?;
            let rem = if rem != 0 && (rem < 0) != (b < 0) {
                rem + b
            } else {
                rem
            };
            Ok(Value::from(rem))
        }
        _ => {
            let (a, b) = (l.as_f64(), r.as_f64());
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let rem = a % b;
            let rem = if rem != 0.0 && (rem < 0.0) != (b < 0.0) {
                rem + b
            } else {
                rem
            };
            float_value(rem)
        }
    }
}

/// Deep equality with numeric promotion: `1 == 1.0` holds, values of
/// different non-numeric types are unequal without error.
pub(crate) fn value_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => match (as_num(left), as_num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(l), Some(r)) => l.as_f64() == r.as_f64(),
            _ => false,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| value_eq(v, w)))
        }
        _ => left == right,
    }
}

/// Ordering for `<`/`<=`/`>`/`>=` and for min/max: numbers against numbers,
/// strings against strings, anything else is a type error.
pub(crate) fn compare_values(left: &Value, right: &Value) -> EvalResult<Ordering> {
    if let (Some(l), Some(r)) = (as_num(left), as_num(right)) {
        return match (l, r) {
            (Num::Int(a), Num::Int(b)) => Ok(a.cmp(&b)),
            _ => l
                .as_f64()
                .partial_cmp(&r.as_f64())
                .ok_or_else(|| EvalError::type_mismatch("NaN is not comparable")),
        };
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(EvalError::type_mismatch(format!(
            "cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn membership(needle: &Value, haystack: &Value) -> EvalResult<bool> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(EvalError::type_mismatch(format!(
                "'in' requires a string on the left when testing against a string, got {}",
                type_name(needle)
            ))),
        },
        Value::Array(items) => Ok(items.iter().any(|item| value_eq(item, needle))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Err(EvalError::type_mismatch(format!(
                "'in' requires a string on the left when testing against an object, got {}",
                type_name(needle)
            ))),
        },
        _ => Err(EvalError::type_mismatch(format!(
            "'in' requires a string, array, or object on the right, got {}",
            type_name(haystack)
        ))),
    }
}

fn member_access(object: &Value, field: &str) -> EvalResult<Value> {
    match object {
        Value::Object(map) => map
            .get(field)
            .cloned()
            .ok_or_else(|| EvalError::UnknownField(field.to_string())),
        _ => Err(EvalError::type_mismatch(format!(
            "cannot access field '{}' on {}",
            field,
            type_name(object)
        ))),
    }
}

fn index_access(object: &Value, index: &Value) -> EvalResult<Value> {
    match object {
        Value::Object(map) => match index {
            Value::String(key) => map
                .get(key)
                .cloned()
                .ok_or_else(|| EvalError::UnknownField(key.clone())),
            _ => Err(EvalError::type_mismatch(format!(
                "object index must be a string, got {}",
                type_name(index)
            ))),
        },
        Value::Array(items) => {
            let i = integer_index(index)?;
            let resolved = resolve_index(i, items.len())?;
            Ok(items[resolved].clone())
        }
        Value::String(s) => {
            let i = integer_index(index)?;
            let chars: Vec<char> = s.chars().collect();
            let resolved = resolve_index(i, chars.len())?;
            Ok(Value::String(chars[resolved].to_string()))
        }
        _ => Err(EvalError::type_mismatch(format!(
            "cannot index into {}",
            type_name(object)
        ))),
    }
}

fn integer_index(index: &Value) -> EvalResult<i64> {
    match as_num(index) {
        Some(Num::Int(i)) => Ok(i),
        _ => Err(EvalError::type_mismatch(format!(
            "index must be an integer, got {}",
            type_name(index)
        ))),
    }
}

/// Negative indices count from the end.
fn resolve_index(index: i64, len: usize) -> EvalResult<usize> {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    if adjusted < 0 || adjusted as usize >= len {
        return Err(EvalError::IndexOutOfBounds { index, len });
    }
    Ok(adjusted as usize)
}
