// SPDX-License-Identifier: MIT OR Apache-2.0
//! Standard library callable nodes.

use crate::callable::{CallError, Callable};
use crate::definition::{DefinitionKind, NodeDefinition};
use crate::signature::{BoundArguments, Parameter, ParameterKind, Signature};
use crate::value::Value;

fn stdlib<F>(id: &str, parameters: Vec<Parameter>, body: F) -> (String, NodeDefinition)
where
    F: Fn(BoundArguments) -> Result<Value, CallError> + Send + Sync + 'static,
{
    let (module, name) = id.rsplit_once('.').unwrap_or(("builtins", id));
    let signature = Signature::new(parameters);
    let callable = Callable::with_bound(name, signature.clone(), body);
    let mut definition =
        NodeDefinition::new(DefinitionKind::Stdlib(id.to_string()), callable, signature);
    definition.stlib_import_text = Some(format!("from {module} import {name}"));
    definition.call_format = Some(name.to_string());
    (id.to_string(), definition)
}

fn only(name: &str) -> Parameter {
    Parameter::new(name, ParameterKind::PositionalOnly)
}

fn domain_error() -> CallError {
    CallError::value_error("math domain error")
}

fn integral(bound: &BoundArguments, round: fn(f64) -> f64) -> Result<Value, CallError> {
    let value = bound.get("x")?;
    if let (Some(i), false) = (value.as_int(), matches!(value, Value::Float(_))) {
        return Ok(Value::Int(i));
    }
    let x = bound.float("x")?;
    if !x.is_finite() {
        return Err(CallError::Custom(format!(
            "OverflowError: cannot convert float {x} to integer"
        )));
    }
    Ok(Value::Int(round(x) as i64))
}

fn text_items(bound: &BoundArguments, first: &str, rest: &str) -> Result<Vec<String>, CallError> {
    let mut parts = vec![bound.str(first)?.to_string()];
    for item in bound.var_positional(rest)? {
        let text = item.as_str().ok_or_else(|| {
            CallError::type_error(format!("expected str, not {}", item.type_name()))
        })?;
        parts.push(text.to_string());
    }
    Ok(parts)
}

fn join(parts: Vec<String>) -> String {
    let mut path = String::new();
    for part in parts {
        if part.starts_with('/') {
            path = part;
        } else if path.is_empty() || path.ends_with('/') {
            path.push_str(&part);
        } else {
            path.push('/');
            path.push_str(&part);
        }
    }
    path
}

/// Every standard library definition, keyed by dotted id
pub(super) fn definitions() -> Vec<(String, NodeDefinition)> {
    vec![
        stdlib("math.sqrt", vec![only("x")], |b| {
            let x = b.float("x")?;
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }),
        stdlib("math.floor", vec![only("x")], |b| integral(&b, f64::floor)),
        stdlib("math.ceil", vec![only("x")], |b| integral(&b, f64::ceil)),
        stdlib(
            "math.hypot",
            vec![Parameter::new("coordinates", ParameterKind::VarPositional)],
            |b| {
                let mut total = 0.0;
                for item in b.var_positional("coordinates")? {
                    let x = item.as_float().ok_or_else(|| {
                        CallError::type_error(format!("must be real number, not {}", item.type_name()))
                    })?;
                    total += x * x;
                }
                Ok(Value::Float(total.sqrt()))
            },
        ),
        stdlib(
            "math.log",
            vec![only("x"), only("base").with_default(Value::Float(std::f64::consts::E))],
            |b| {
                let (x, base) = (b.float("x")?, b.float("base")?);
                if x <= 0.0 || base <= 0.0 || base == 1.0 {
                    return Err(domain_error());
                }
                Ok(Value::Float(x.ln() / base.ln()))
            },
        ),
        stdlib(
            "math.isclose",
            vec![
                only("a"),
                only("b"),
                Parameter::new("rel_tol", ParameterKind::KeywordOnly).with_default(Value::Float(1e-9)),
                Parameter::new("abs_tol", ParameterKind::KeywordOnly).with_default(Value::Float(0.0)),
            ],
            |b| {
                let (x, y) = (b.float("a")?, b.float("b")?);
                let (rel_tol, abs_tol) = (b.float("rel_tol")?, b.float("abs_tol")?);
                if rel_tol < 0.0 || abs_tol < 0.0 {
                    return Err(CallError::value_error("tolerances must be non-negative"));
                }
                let close = x == y || (x - y).abs() <= (rel_tol * x.abs().max(y.abs())).max(abs_tol);
                Ok(Value::Bool(close))
            },
        ),
        stdlib(
            "os.path.join",
            vec![
                only("a"),
                Parameter::new("paths", ParameterKind::VarPositional),
            ],
            |b| Ok(Value::Str(join(text_items(&b, "a", "paths")?))),
        ),
        stdlib("os.path.basename", vec![only("p")], |b| {
            let path = b.str("p")?;
            Ok(Value::str(path.rsplit('/').next().unwrap_or(path)))
        }),
        stdlib("statistics.mean", vec![only("data")], |b| {
            let data = b.get("data")?;
            let items = data.iter_items().ok_or_else(|| {
                CallError::type_error(format!("'{}' object is not iterable", data.type_name()))
            })?;
            if items.is_empty() {
                return Err(CallError::Custom(
                    "StatisticsError: mean requires at least one data point".into(),
                ));
            }
            let mut total = 0.0;
            for item in &items {
                total += item.as_float().ok_or_else(|| {
                    CallError::type_error(format!("can't convert type '{}' to numerator", item.type_name()))
                })?;
            }
            Ok(Value::Float(total / items.len() as f64))
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::CallArgs;

    fn definition(id: &str) -> NodeDefinition {
        definitions()
            .into_iter()
            .find(|(key, _)| key == id)
            .map(|(_, d)| d)
            .unwrap()
    }

    #[test]
    fn test_import_text_and_call_format() {
        let join = definition("os.path.join");
        assert_eq!(join.stlib_import_text.as_deref(), Some("from os.path import join"));
        assert_eq!(join.export_name(), "join");
        let result = join
            .main_callable
            .call(CallArgs::positional([Value::str("a"), Value::str("b"), Value::str("c.txt")]))
            .unwrap();
        assert_eq!(result, Value::str("a/b/c.txt"));
    }

    #[test]
    fn test_math() {
        let sqrt = definition("math.sqrt");
        assert_eq!(
            sqrt.main_callable.call(CallArgs::positional([Value::Int(9)])),
            Ok(Value::Float(3.0))
        );
        assert!(sqrt.main_callable.call(CallArgs::positional([Value::Int(-1)])).is_err());
        let floor = definition("math.floor");
        assert_eq!(
            floor.main_callable.call(CallArgs::positional([Value::Float(-1.5)])),
            Ok(Value::Int(-2))
        );
        let log = definition("math.log");
        assert_eq!(
            log.main_callable.call(CallArgs::positional([Value::Int(8), Value::Int(2)])),
            Ok(Value::Float(3.0))
        );
    }

    #[test]
    fn test_mean() {
        let mean = definition("statistics.mean");
        let data = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(mean.main_callable.call(CallArgs::positional([data])), Ok(Value::Float(2.0)));
    }
}
