// SPDX-License-Identifier: MIT OR Apache-2.0
//! Operator nodes and the value arithmetic behind them.

use super::template_substitution;
use crate::callable::{CallError, Callable};
use crate::definition::{DefinitionKind, NodeDefinition};
use crate::signature::{Parameter, Signature};
use crate::value::Value;
use std::cmp::Ordering;

type Binary = fn(&Value, &Value) -> Result<Value, CallError>;
type Unary = fn(&Value) -> Result<Value, CallError>;

const BINARY: &[(&str, Binary)] = &[
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("/", truediv),
    ("//", floordiv),
    ("%", modulo),
    ("**", power),
    ("==", |a, b| Ok(Value::Bool(a == b))),
    ("!=", |a, b| Ok(Value::Bool(a != b))),
    ("<", |a, b| Ok(Value::Bool(compare(a, b)? == Ordering::Less))),
    ("<=", |a, b| Ok(Value::Bool(compare(a, b)? != Ordering::Greater))),
    (">", |a, b| Ok(Value::Bool(compare(a, b)? == Ordering::Greater))),
    (">=", |a, b| Ok(Value::Bool(compare(a, b)? != Ordering::Less))),
    ("and", |a, b| Ok(if a.is_truthy() { b.clone() } else { a.clone() })),
    ("or", |a, b| Ok(if a.is_truthy() { a.clone() } else { b.clone() })),
    ("is", |a, b| Ok(Value::Bool(is_same(a, b)))),
    ("is not", |a, b| Ok(Value::Bool(!is_same(a, b)))),
    ("in", |a, b| Ok(Value::Bool(contains(b, a)?))),
    ("not in", |a, b| Ok(Value::Bool(!contains(b, a)?))),
    ("&", |a, b| bitwise(a, b, "&", |x, y| Some(x & y))),
    ("|", |a, b| bitwise(a, b, "|", |x, y| Some(x | y))),
    ("^", |a, b| bitwise(a, b, "^", |x, y| Some(x ^ y))),
    ("<<", |a, b| {
        bitwise(a, b, "<<", |x, y| u32::try_from(y).ok().and_then(|y| x.checked_shl(y)))
    }),
    (">>", |a, b| {
        bitwise(a, b, ">>", |x, y| u32::try_from(y).ok().map(|y| x >> y.min(63)))
    }),
];

const UNARY: &[(&str, &str, Unary)] = &[
    ("not", "not", |a| Ok(Value::Bool(!a.is_truthy()))),
    ("neg", "-", negate),
    ("pos", "+", |a| match a {
        Value::Int(_) | Value::Float(_) => Ok(a.clone()),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        other => Err(unsupported_unary("+", other)),
    }),
    ("invert", "~", |a| match a.as_int() {
        Some(i) if !matches!(a, Value::Float(_)) => Ok(Value::Int(!i)),
        _ => Err(unsupported_unary("~", a)),
    }),
];

/// Every operator definition, keyed by operation id
pub(super) fn definitions() -> Vec<(String, NodeDefinition)> {
    let mut definitions = Vec::new();
    for (symbol, op) in BINARY {
        let op = *op;
        let signature = Signature::new(vec![Parameter::positional("a"), Parameter::positional("b")]);
        let callable = Callable::with_bound(*symbol, signature.clone(), move |bound| {
            op(bound.get("a")?, bound.get("b")?)
        })
        .with_source(format!("lambda a, b: a {symbol} b"));
        let mut definition = NodeDefinition::new(
            DefinitionKind::Operator((*symbol).to_string()),
            callable,
            signature,
        );
        definition.substitution_callable = Some(template_substitution(
            &format!("{symbol}_substitution"),
            &format!("{{output}} = {{a}} {symbol} {{b}}"),
        ));
        definitions.push(((*symbol).to_string(), definition));
    }
    for (id, symbol, op) in UNARY {
        let op = *op;
        let signature = Signature::new(vec![Parameter::positional("a")]);
        let spacer = if symbol.len() > 1 { " " } else { "" };
        let callable = Callable::with_bound(*symbol, signature.clone(), move |bound| {
            op(bound.get("a")?)
        })
        .with_source(format!("lambda a: {symbol}{spacer}a"));
        let mut definition =
            NodeDefinition::new(DefinitionKind::Operator((*id).to_string()), callable, signature);
        definition.substitution_callable = Some(template_substitution(
            &format!("{id}_substitution"),
            &format!("{{output}} = {symbol}{spacer}{{a}}"),
        ));
        definitions.push(((*id).to_string(), definition));
    }
    definitions
}

fn unsupported(op: &str, a: &Value, b: &Value) -> CallError {
    CallError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

fn unsupported_unary(op: &str, a: &Value) -> CallError {
    CallError::type_error(format!("bad operand type for unary {op}: '{}'", a.type_name()))
}

fn is_float(a: &Value, b: &Value) -> bool {
    matches!(a, Value::Float(_)) || matches!(b, Value::Float(_))
}

fn numeric(
    a: &Value,
    b: &Value,
    op: &str,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, CallError> {
    if !is_float(a, b) {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            return int_op(x, y)
                .map(Value::Int)
                .ok_or_else(|| CallError::Custom(format!("OverflowError: integer overflow in {op}")));
        }
    }
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => Ok(Value::Float(float_op(x, y))),
        _ => Err(unsupported(op, a, b)),
    }
}

/// `a + b`
pub(crate) fn add(a: &Value, b: &Value) -> Result<Value, CallError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
        (Value::List(x), Value::List(y)) => Ok(Value::List([x.as_slice(), y].concat())),
        (Value::Tuple(x), Value::Tuple(y)) => Ok(Value::Tuple([x.as_slice(), y].concat())),
        _ => numeric(a, b, "+", i64::checked_add, |x, y| x + y),
    }
}

fn sub(a: &Value, b: &Value) -> Result<Value, CallError> {
    numeric(a, b, "-", i64::checked_sub, |x, y| x - y)
}

fn index_overflow() -> CallError {
    CallError::Custom("OverflowError: cannot fit 'int' into an index-sized integer".into())
}

pub(crate) fn memory_error() -> CallError {
    CallError::Custom("MemoryError".into())
}

/// Length of a sequence of `len` items repeated `times` times; negative
/// counts repeat zero times
fn repeated_len(len: usize, times: i64) -> Result<usize, CallError> {
    let times = usize::try_from(times).unwrap_or(0);
    len.checked_mul(times).ok_or_else(index_overflow)
}

fn repeat(items: &[Value], times: i64) -> Result<Vec<Value>, CallError> {
    let total = repeated_len(items.len(), times)?;
    let mut repeated = Vec::new();
    repeated.try_reserve_exact(total).map_err(|_| memory_error())?;
    repeated.extend(items.iter().cloned().cycle().take(total));
    Ok(repeated)
}

fn repeat_str(s: &str, times: i64) -> Result<String, CallError> {
    let total = repeated_len(s.len(), times)?;
    if total == 0 {
        return Ok(String::new());
    }
    let mut repeated = String::new();
    repeated.try_reserve_exact(total).map_err(|_| memory_error())?;
    while repeated.len() < total {
        repeated.push_str(s);
    }
    Ok(repeated)
}

fn mul(a: &Value, b: &Value) -> Result<Value, CallError> {
    match (a, b) {
        (Value::Str(s), n) | (n, Value::Str(s)) if !matches!(n, Value::Float(_)) => match n.as_int() {
            Some(n) => Ok(Value::Str(repeat_str(s, n)?)),
            None => Err(unsupported("*", a, b)),
        },
        (Value::List(items), n) | (n, Value::List(items)) if !matches!(n, Value::Float(_)) => {
            match n.as_int() {
                Some(n) => Ok(Value::List(repeat(items, n)?)),
                None => Err(unsupported("*", a, b)),
            }
        }
        (Value::Tuple(items), n) | (n, Value::Tuple(items)) if !matches!(n, Value::Float(_)) => {
            match n.as_int() {
                Some(n) => Ok(Value::Tuple(repeat(items, n)?)),
                None => Err(unsupported("*", a, b)),
            }
        }
        _ => numeric(a, b, "*", i64::checked_mul, |x, y| x * y),
    }
}

fn divisor(a: &Value, b: &Value, op: &str) -> Result<(f64, f64), CallError> {
    match (a.as_float(), b.as_float()) {
        (Some(_), Some(y)) if y == 0.0 => Err(CallError::ZeroDivision("division by zero".into())),
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(unsupported(op, a, b)),
    }
}

fn truediv(a: &Value, b: &Value) -> Result<Value, CallError> {
    let (x, y) = divisor(a, b, "/")?;
    Ok(Value::Float(x / y))
}

pub(crate) fn floordiv(a: &Value, b: &Value) -> Result<Value, CallError> {
    divisor(a, b, "//")?;
    numeric(
        a,
        b,
        "//",
        |x, y| {
            let q = x.checked_div(y)?;
            Some(if x.checked_rem(y)? != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q })
        },
        |x, y| (x / y).floor(),
    )
}

pub(crate) fn modulo(a: &Value, b: &Value) -> Result<Value, CallError> {
    if let Value::Str(template) = a {
        return Ok(Value::Str(percent_format(template, b)));
    }
    divisor(a, b, "%")?;
    numeric(
        a,
        b,
        "%",
        |x, y| {
            let r = x.checked_rem(y)?;
            Some(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r })
        },
        |x, y| {
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        },
    )
}

fn percent_format(template: &str, args: &Value) -> String {
    let values = match args {
        Value::Tuple(items) => items.clone(),
        other => vec![other.clone()],
    };
    let mut values = values.into_iter();
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('r') => out.push_str(&values.next().unwrap_or_default().repr()),
            Some(_) => out.push_str(&values.next().unwrap_or_default().to_string()),
            None => out.push('%'),
        }
    }
    out
}

pub(crate) fn power(a: &Value, b: &Value) -> Result<Value, CallError> {
    if !is_float(a, b) {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            if y >= 0 {
                return u32::try_from(y)
                    .ok()
                    .and_then(|y| x.checked_pow(y))
                    .map(Value::Int)
                    .ok_or_else(|| CallError::Custom("OverflowError: integer overflow in **".into()));
            }
        }
    }
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(_)) if x == 0.0 && b.as_float().is_some_and(|y| y < 0.0) => Err(
            CallError::ZeroDivision("0.0 cannot be raised to a negative power".into()),
        ),
        (Some(x), Some(y)) => Ok(Value::Float(x.powf(y))),
        _ => Err(unsupported("**", a, b)),
    }
}

pub(crate) fn negate(a: &Value) -> Result<Value, CallError> {
    match a {
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Int(_) | Value::Bool(_) => a
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(|| CallError::Custom("OverflowError: integer overflow in -".into())),
        other => Err(unsupported_unary("-", other)),
    }
}

fn bitwise(
    a: &Value,
    b: &Value,
    op: &str,
    f: impl Fn(i64, i64) -> Option<i64>,
) -> Result<Value, CallError> {
    if is_float(a, b) {
        return Err(unsupported(op, a, b));
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) if matches!(op, "&" | "|" | "^") => {
            let result = f(i64::from(*x), i64::from(*y)).unwrap_or(0);
            Ok(Value::Bool(result != 0))
        }
        _ => match (a.as_int(), b.as_int()) {
            (Some(_), Some(y)) if y < 0 && matches!(op, "<<" | ">>") => {
                Err(CallError::value_error("negative shift count"))
            }
            (Some(x), Some(y)) => f(x, y)
                .map(Value::Int)
                .ok_or_else(|| CallError::Custom(format!("OverflowError: integer overflow in {op}"))),
            _ => Err(unsupported(op, a, b)),
        },
    }
}

/// Ordering between two comparable values
pub(crate) fn compare(a: &Value, b: &Value) -> Result<Ordering, CallError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (i, j) in x.iter().zip(y) {
                let ordering = compare(i, j)?;
                if ordering != Ordering::Equal {
                    return Ok(ordering);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ if !is_float(a, b) && a.as_int().is_some() && b.as_int().is_some() => {
            Ok(a.as_int().cmp(&b.as_int()))
        }
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                CallError::value_error("cannot order nan")
            }),
            _ => Err(CallError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Callable(x), Value::Callable(y)) => x == y,
        _ => false,
    }
}

/// `item in container`
pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, CallError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(CallError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.contains(item)),
        Value::Map(map) => Ok(item.as_str().is_some_and(|key| map.contains_key(key))),
        other => Err(CallError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}
