// SPDX-License-Identifier: MIT OR Apache-2.0
//! Argument marshalling.
//!
//! Arguments are laid out by parameter kind: positional kinds go by
//! position, var-positional is splatted, keyword-only goes by name and
//! var-keyword is double-splatted. The same layout drives both invocation
//! and the exporter's call expressions, so the exported script passes
//! exactly what execution passes.

use crate::callable::{CallArgs, CallError, Callable};
use crate::signature::{Parameter, ParameterKind, Signature};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// What a node has accumulated for one parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    /// Value of a regular parameter
    Single(Value),
    /// Values of a variable-kind parameter's subparameters, by index
    Subparameters(BTreeMap<usize, Value>),
}

/// Per-node argument accumulator, keyed by parameter name
pub type ArgumentMap = IndexMap<String, ArgumentValue>;

/// A positional slot of a call
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    /// Passed as is
    Plain(T),
    /// Splatted with `*`
    Splat(T),
}

/// Arguments arranged for a call, generic over what an argument is
/// (a runtime value or an exported expression)
#[derive(Debug, Clone, PartialEq)]
pub struct CallLayout<T> {
    /// Positional slots, in order
    pub positional: Vec<Slot<T>>,
    /// Keyword arguments, in order
    pub keyword: Vec<(String, T)>,
    /// Mapping double-splatted with `**`
    pub double_splat: Option<T>,
}

/// Arrange the arguments of `signature`.
///
/// `argument` yields the argument of a parameter, or `None` when the
/// parameter is left to its default. A positional parameter left out before
/// a later positional argument is a gap: later positional-or-keyword
/// arguments switch to keyword passing, unless positional-only or
/// var-positional arguments follow, in which case the gap is filled with the
/// parameter default rendered by `default`.
pub fn lay_out<T>(
    signature: &Signature,
    mut argument: impl FnMut(&Parameter) -> Option<T>,
    default: impl Fn(&Value) -> T,
) -> CallLayout<T> {
    let mut positional_args: Vec<(&Parameter, Option<T>)> = Vec::new();
    let mut var_positional = None;
    let mut keyword = Vec::new();
    let mut double_splat = None;

    for param in &signature.parameters {
        match param.kind {
            ParameterKind::PositionalOnly | ParameterKind::PositionalOrKeyword => {
                let value = argument(param);
                positional_args.push((param, value));
            }
            ParameterKind::VarPositional => var_positional = argument(param),
            ParameterKind::KeywordOnly => {
                if let Some(value) = argument(param) {
                    keyword.push((param.name.clone(), value));
                }
            }
            ParameterKind::VarKeyword => double_splat = argument(param),
        }
    }

    let last_present = positional_args.iter().rposition(|(_, v)| v.is_some());
    let first_missing = positional_args.iter().position(|(_, v)| v.is_none());
    let positional_only_after_gap = match first_missing {
        Some(gap) => positional_args
            .iter()
            .skip(gap)
            .any(|(p, v)| v.is_some() && p.kind == ParameterKind::PositionalOnly),
        None => false,
    };
    let backfill = var_positional.is_some() || positional_only_after_gap;
    let fill_until = if var_positional.is_some() {
        positional_args.len()
    } else {
        last_present.map_or(0, |last| last + 1)
    };

    let mut positional = Vec::new();
    let mut keyword_from_positional = Vec::new();
    let mut gap = false;
    for (index, (param, value)) in positional_args.into_iter().enumerate() {
        match value {
            Some(value) if !gap => positional.push(Slot::Plain(value)),
            Some(value) => keyword_from_positional.push((param.name.clone(), value)),
            None if backfill && index < fill_until => {
                match &param.default {
                    Some(d) => positional.push(Slot::Plain(default(d))),
                    None => gap = true,
                }
            }
            None => gap = true,
        }
    }
    if let Some(value) = var_positional {
        positional.push(Slot::Splat(value));
    }

    keyword_from_positional.extend(keyword);
    CallLayout {
        positional,
        keyword: keyword_from_positional,
        double_splat,
    }
}

impl CallLayout<Value> {
    /// Resolve splats into concrete call arguments
    pub fn into_call_args(self) -> Result<CallArgs, CallError> {
        let mut args = CallArgs::new();
        for slot in self.positional {
            match slot {
                Slot::Plain(value) => args.positional.push(value),
                Slot::Splat(value) => {
                    let items = value.iter_items().ok_or_else(|| {
                        CallError::type_error(format!(
                            "argument after * must be an iterable, not {}",
                            value.type_name()
                        ))
                    })?;
                    args.positional.extend(items);
                }
            }
        }
        for (name, value) in self.keyword {
            insert_keyword(&mut args, name, value)?;
        }
        if let Some(value) = self.double_splat {
            let Value::Map(map) = value else {
                return Err(CallError::type_error(format!(
                    "argument after ** must be a mapping, not {}",
                    value.type_name()
                )));
            };
            for (name, value) in map {
                insert_keyword(&mut args, name, value)?;
            }
        }
        Ok(args)
    }
}

fn insert_keyword(args: &mut CallArgs, name: String, value: Value) -> Result<(), CallError> {
    if args.keyword.contains_key(&name) {
        return Err(CallError::type_error(format!(
            "got multiple values for keyword argument '{name}'"
        )));
    }
    args.keyword.insert(name, value);
    Ok(())
}

/// Invoke `callable` with `arguments` laid out per `signature`.
///
/// Parameters missing from `arguments` are omitted so the callable's own
/// defaults apply.
pub fn invoke(
    callable: &Callable,
    arguments: &IndexMap<String, Value>,
    signature: &Signature,
) -> Result<Value, CallError> {
    let layout = lay_out(signature, |p| arguments.get(&p.name).cloned(), Value::clone);
    callable.call(layout.into_call_args()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(signature: Signature) -> Callable {
        Callable::new("echo", Some(signature), |args| {
            let mut out = IndexMap::new();
            out.insert("positional".to_string(), Value::Tuple(args.positional));
            out.insert("keyword".to_string(), Value::Map(args.keyword));
            Ok(Value::Map(out))
        })
    }

    fn full_signature() -> Signature {
        Signature::new(vec![
            Parameter::new("a", ParameterKind::PositionalOnly),
            Parameter::positional("b").with_default(Value::Int(0)),
            Parameter::new("args", ParameterKind::VarPositional),
            Parameter::new("k", ParameterKind::KeywordOnly),
            Parameter::new("kwargs", ParameterKind::VarKeyword),
        ])
    }

    #[test]
    fn test_invoke_lays_out_each_kind() {
        let sig = full_signature();
        let mut arguments = IndexMap::new();
        arguments.insert("a".to_string(), Value::Int(1));
        arguments.insert("b".to_string(), Value::Int(2));
        arguments.insert("args".to_string(), Value::Tuple(vec![Value::Int(3), Value::Int(4)]));
        arguments.insert("k".to_string(), Value::str("kw"));
        arguments.insert("kwargs".to_string(), Value::map([("z", Value::Int(9))]));

        let result = invoke(&echo(sig.clone()), &arguments, &sig).unwrap();
        assert_eq!(
            result.as_map().unwrap()["positional"],
            Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)])
        );
        assert_eq!(
            result.as_map().unwrap()["keyword"],
            Value::map([("k", Value::str("kw")), ("z", Value::Int(9))])
        );
    }

    #[test]
    fn test_missing_parameters_are_omitted() {
        let sig = Signature::new(vec![
            Parameter::positional("x").with_default(Value::Int(1)),
            Parameter::positional("y").with_default(Value::Int(2)),
        ]);
        let mut arguments = IndexMap::new();
        arguments.insert("y".to_string(), Value::Int(5));

        let result = invoke(&echo(sig.clone()), &arguments, &sig).unwrap();
        let map = result.as_map().unwrap();
        assert_eq!(map["positional"], Value::Tuple(vec![]));
        assert_eq!(map["keyword"], Value::map([("y", Value::Int(5))]));
    }

    #[test]
    fn test_gap_before_varargs_is_backfilled() {
        let sig = full_signature();
        let mut arguments = IndexMap::new();
        arguments.insert("a".to_string(), Value::Int(1));
        arguments.insert("args".to_string(), Value::Tuple(vec![Value::Int(7)]));
        let layout = lay_out(&sig, |p| arguments.get(&p.name).cloned(), Value::clone);
        assert_eq!(
            layout.positional,
            vec![
                Slot::Plain(Value::Int(1)),
                Slot::Plain(Value::Int(0)),
                Slot::Splat(Value::Tuple(vec![Value::Int(7)]))
            ]
        );
    }

    #[test]
    fn test_non_mapping_double_splat_is_rejected() {
        let layout = CallLayout {
            positional: vec![],
            keyword: vec![],
            double_splat: Some(Value::Int(1)),
        };
        assert!(layout.into_call_args().is_err());
    }
}
