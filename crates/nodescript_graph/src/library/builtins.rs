// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in function nodes.

use super::operators::{add, compare, floordiv, memory_error, modulo, power};
use crate::callable::{CallError, Callable};
use crate::definition::{DefinitionKind, NodeDefinition};
use crate::signature::{BoundArguments, Parameter, ParameterKind, Signature};
use crate::stdout;
use crate::value::Value;
use indexmap::IndexMap;
use std::cmp::Ordering;

fn builtin<F>(name: &str, parameters: Vec<Parameter>, body: F) -> (String, NodeDefinition)
where
    F: Fn(BoundArguments) -> Result<Value, CallError> + Send + Sync + 'static,
{
    let signature = Signature::new(parameters);
    let callable = Callable::with_bound(name, signature.clone(), body);
    let definition =
        NodeDefinition::new(DefinitionKind::Builtin(name.to_string()), callable, signature);
    (name.to_string(), definition)
}

fn only(name: &str) -> Parameter {
    Parameter::new(name, ParameterKind::PositionalOnly)
}

fn var(name: &str) -> Parameter {
    Parameter::new(name, ParameterKind::VarPositional)
}

fn keyword(name: &str, default: Value) -> Parameter {
    Parameter::new(name, ParameterKind::KeywordOnly).with_default(default)
}

fn items_of(value: &Value) -> Result<Vec<Value>, CallError> {
    value.iter_items().ok_or_else(|| {
        CallError::type_error(format!("'{}' object is not iterable", value.type_name()))
    })
}

/// Items of `*args`, or of its single argument when only one is given
fn candidates(args: &[Value]) -> Result<Vec<Value>, CallError> {
    match args {
        [single] => items_of(single),
        many => Ok(many.to_vec()),
    }
}

fn extreme(name: &str, args: &[Value], wanted: Ordering) -> Result<Value, CallError> {
    let mut best: Option<Value> = None;
    for item in candidates(args)? {
        best = match best {
            Some(current) if compare(&item, &current)? != wanted => Some(current),
            _ => Some(item),
        };
    }
    best.ok_or_else(|| CallError::value_error(format!("{name}() arg is an empty sequence")))
}

fn to_int(value: &Value) -> Result<Value, CallError> {
    match value {
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(f) => Err(CallError::value_error(format!("cannot convert float {f} to integer"))),
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| CallError::value_error(format!("invalid literal for int() with base 10: {}", value.repr()))),
        other => other
            .as_int()
            .map(Value::Int)
            .ok_or_else(|| CallError::type_error(format!("int() argument must be a string or a number, not '{}'", other.type_name()))),
    }
}

fn to_float(value: &Value) -> Result<Value, CallError> {
    match value {
        Value::Str(s) => {
            let text = s.trim().to_lowercase();
            let parsed = match text.as_str() {
                "nan" => Some(f64::NAN),
                "inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                _ => text.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                CallError::value_error(format!("could not convert string to float: {}", value.repr()))
            })
        }
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            CallError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn length(value: &Value) -> Result<Value, CallError> {
    let len = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) | Value::Tuple(items) => items.len(),
        Value::Map(map) => map.len(),
        other => {
            return Err(CallError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

fn range(bound: &BoundArguments) -> Result<Value, CallError> {
    let (start, stop) = match bound.get("stop")? {
        Value::None => (0, bound.int("start")?),
        _ => (bound.int("start")?, bound.int("stop")?),
    };
    let step = bound.int("step")?;
    if step == 0 {
        return Err(CallError::value_error("range() arg 3 must not be zero"));
    }
    let span = i128::from(stop) - i128::from(start);
    let count = if (step > 0 && span > 0) || (step < 0 && span < 0) {
        let step = i128::from(step);
        (span + step - step.signum()) / step
    } else {
        0
    };
    let count = usize::try_from(count).map_err(|_| memory_error())?;
    let mut items = Vec::new();
    items.try_reserve_exact(count).map_err(|_| memory_error())?;
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::List(items))
}

fn round(bound: &BoundArguments) -> Result<Value, CallError> {
    let number = bound.get("number")?;
    let ndigits = bound.get("ndigits")?;
    if let (Value::Int(_) | Value::Bool(_), Value::None) = (number, ndigits) {
        return Ok(Value::Int(number.as_int().unwrap_or_default()));
    }
    let x = bound.float("number")?;
    match ndigits {
        Value::None => {
            // Round half to even
            let rounded = x.round();
            let value = if (x - x.trunc()).abs() == 0.5 {
                2.0 * (x / 2.0).round()
            } else {
                rounded
            };
            Ok(Value::Int(value as i64))
        }
        digits => {
            let digits = digits
                .as_int()
                .ok_or_else(|| CallError::type_error("ndigits must be an integer"))?;
            let factor = 10f64.powi(i32::try_from(digits).unwrap_or(i32::MAX));
            let rounded = (x * factor).round() / factor;
            if matches!(number, Value::Float(_)) {
                Ok(Value::Float(rounded))
            } else {
                Ok(Value::Int(rounded as i64))
            }
        }
    }
}

fn sorted(bound: &BoundArguments) -> Result<Value, CallError> {
    let mut items = items_of(bound.get("iterable")?)?;
    let mut failure = None;
    items.sort_by(|a, b| {
        compare(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    if let Some(error) = failure {
        return Err(error);
    }
    if bound.get("reverse")?.is_truthy() {
        items.reverse();
    }
    Ok(Value::List(items))
}

fn dict(bound: &BoundArguments) -> Result<Value, CallError> {
    let mut map = IndexMap::new();
    match bound.get("iterable")? {
        Value::None => {}
        Value::Map(source) => map.extend(source.iter().map(|(k, v)| (k.clone(), v.clone()))),
        other => {
            for pair in items_of(other)? {
                match pair.iter_items().as_deref() {
                    Some([Value::Str(key), value]) => {
                        map.insert(key.clone(), value.clone());
                    }
                    _ => {
                        return Err(CallError::type_error(
                            "dict() expects pairs with text keys",
                        ))
                    }
                }
            }
        }
    }
    map.extend(bound.var_keyword("kwargs")?.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(Value::Map(map))
}

/// Every builtin definition, keyed by builtin id
pub(super) fn definitions() -> Vec<(String, NodeDefinition)> {
    vec![
        builtin("abs", vec![only("x")], |b| match b.get("x")? {
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => other
                .as_int()
                .and_then(i64::checked_abs)
                .map(Value::Int)
                .ok_or_else(|| {
                    CallError::type_error(format!("bad operand type for abs(): '{}'", other.type_name()))
                }),
        }),
        builtin("all", vec![only("iterable")], |b| {
            Ok(Value::Bool(items_of(b.get("iterable")?)?.iter().all(Value::is_truthy)))
        }),
        builtin("any", vec![only("iterable")], |b| {
            Ok(Value::Bool(items_of(b.get("iterable")?)?.iter().any(Value::is_truthy)))
        }),
        builtin("bool", vec![only("x").with_default(Value::Bool(false))], |b| {
            Ok(Value::Bool(b.get("x")?.is_truthy()))
        }),
        builtin(
            "dict",
            vec![
                only("iterable").with_default(Value::None),
                Parameter::new("kwargs", ParameterKind::VarKeyword),
            ],
            |b| dict(&b),
        ),
        builtin("divmod", vec![only("a"), only("b")], |b| {
            let (x, y) = (b.get("a")?, b.get("b")?);
            Ok(Value::Tuple(vec![floordiv(x, y)?, modulo(x, y)?]))
        }),
        builtin("float", vec![only("x").with_default(Value::Float(0.0))], |b| {
            to_float(b.get("x")?)
        }),
        builtin("int", vec![only("x").with_default(Value::Int(0))], |b| to_int(b.get("x")?)),
        builtin("len", vec![only("obj")], |b| length(b.get("obj")?)),
        builtin("list", vec![only("iterable").with_default(Value::Tuple(vec![]))], |b| {
            Ok(Value::List(items_of(b.get("iterable")?)?))
        }),
        builtin("max", vec![var("args")], |b| {
            extreme("max", b.var_positional("args")?, Ordering::Greater)
        }),
        builtin("min", vec![var("args")], |b| {
            extreme("min", b.var_positional("args")?, Ordering::Less)
        }),
        builtin("pow", vec![Parameter::positional("base"), Parameter::positional("exp")], |b| {
            power(b.get("base")?, b.get("exp")?)
        }),
        builtin(
            "print",
            vec![
                var("values"),
                keyword("sep", Value::str(" ")),
                keyword("end", Value::str("\n")),
            ],
            |b| {
                let texts: Vec<String> =
                    b.var_positional("values")?.iter().map(ToString::to_string).collect();
                let sep = b.get("sep")?.to_string();
                let end = b.get("end")?.to_string();
                stdout::write(&format!("{}{end}", texts.join(&sep)));
                Ok(Value::None)
            },
        ),
        builtin(
            "range",
            vec![
                only("start"),
                only("stop").with_default(Value::None),
                only("step").with_default(Value::Int(1)),
            ],
            |b| range(&b),
        ),
        builtin("repr", vec![only("obj")], |b| Ok(Value::Str(b.get("obj")?.repr()))),
        builtin("reversed", vec![only("sequence")], |b| {
            let mut items = items_of(b.get("sequence")?)?;
            items.reverse();
            Ok(Value::List(items))
        }),
        builtin(
            "round",
            vec![
                Parameter::positional("number"),
                Parameter::positional("ndigits").with_default(Value::None),
            ],
            |b| round(&b),
        ),
        builtin(
            "sorted",
            vec![only("iterable"), keyword("reverse", Value::Bool(false))],
            |b| sorted(&b),
        ),
        builtin("str", vec![Parameter::positional("object").with_default(Value::str(""))], |b| {
            Ok(Value::Str(b.get("object")?.to_string()))
        }),
        builtin(
            "sum",
            vec![only("iterable"), Parameter::positional("start").with_default(Value::Int(0))],
            |b| {
                let mut total = b.get("start")?.clone();
                for item in items_of(b.get("iterable")?)? {
                    total = add(&total, &item)?;
                }
                Ok(total)
            },
        ),
        builtin("tuple", vec![only("iterable").with_default(Value::Tuple(vec![]))], |b| {
            Ok(Value::Tuple(items_of(b.get("iterable")?)?))
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::CallArgs;

    fn call(name: &str, args: CallArgs) -> Result<Value, CallError> {
        let (_, definition) = definitions()
            .into_iter()
            .find(|(id, _)| id == name)
            .unwrap();
        definition.main_callable.call(args)
    }

    #[test]
    fn test_numeric_builtins() {
        assert_eq!(call("abs", CallArgs::positional([Value::Int(-3)])), Ok(Value::Int(3)));
        assert_eq!(
            call("divmod", CallArgs::positional([Value::Int(7), Value::Int(2)])),
            Ok(Value::Tuple(vec![Value::Int(3), Value::Int(1)]))
        );
        assert_eq!(call("round", CallArgs::positional([Value::Float(2.5)])), Ok(Value::Int(2)));
        assert_eq!(call("round", CallArgs::positional([Value::Float(3.5)])), Ok(Value::Int(4)));
        assert_eq!(call("int", CallArgs::positional([Value::str(" 42 ")])), Ok(Value::Int(42)));
        assert!(call("int", CallArgs::positional([Value::str("x")])).is_err());
    }

    #[test]
    fn test_sequence_builtins() {
        let items = Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(call("max", CallArgs::positional([items.clone()])), Ok(Value::Int(3)));
        assert_eq!(
            call("min", CallArgs::positional([Value::Int(5), Value::Int(4)])),
            Ok(Value::Int(4))
        );
        assert_eq!(
            call("sorted", CallArgs::positional([items.clone()]).with_keyword("reverse", Value::Bool(true))),
            Ok(Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)]))
        );
        assert_eq!(call("sum", CallArgs::positional([items])), Ok(Value::Int(6)));
        assert_eq!(
            call("range", CallArgs::positional([Value::Int(3)])),
            Ok(Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(2)]))
        );
        assert!(call("max", CallArgs::positional([Value::List(vec![])])).is_err());
    }

    #[test]
    fn test_range_near_integer_bounds() {
        let range_of = |values: [i64; 3]| call("range", CallArgs::positional(values.map(Value::Int)));
        assert_eq!(
            range_of([i64::MAX - 1, i64::MAX, 2]),
            Ok(Value::List(vec![Value::Int(i64::MAX - 1)]))
        );
        assert_eq!(
            range_of([i64::MIN + 1, i64::MIN, -2]),
            Ok(Value::List(vec![Value::Int(i64::MIN + 1)]))
        );
        assert_eq!(
            range_of([i64::MAX - 4, i64::MAX, 2]),
            Ok(Value::List(vec![Value::Int(i64::MAX - 4), Value::Int(i64::MAX - 2)]))
        );
        assert_eq!(range_of([5, 1, 1]), Ok(Value::List(vec![])));
        assert_eq!(
            range_of([10, 1, -4]),
            Ok(Value::List(vec![Value::Int(10), Value::Int(6), Value::Int(2)]))
        );
        assert!(range_of([0, i64::MAX, 1]).is_err());
    }

    #[test]
    fn test_print_writes_to_engine_stdout() {
        let _serial = stdout::TEST_LOCK.lock();
        let guard = stdout::redirect();
        call(
            "print",
            CallArgs::positional([Value::str("a"), Value::Int(1)]).with_keyword("sep", Value::str("-")),
        )
        .unwrap();
        assert_eq!(guard.finish(), "a-1\n");
    }

    #[test]
    fn test_dict_merges_keywords() {
        let pairs = Value::List(vec![Value::Tuple(vec![Value::str("a"), Value::Int(1)])]);
        let result = call("dict", CallArgs::positional([pairs]).with_keyword("b", Value::Int(2)));
        assert_eq!(result, Ok(Value::map([("a", Value::Int(1)), ("b", Value::Int(2))])));
    }
}
