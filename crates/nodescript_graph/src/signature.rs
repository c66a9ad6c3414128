// SPDX-License-Identifier: MIT OR Apache-2.0
//! Callable signatures: parameter kinds, defaults and declared outputs.

use crate::callable::{CallArgs, CallError};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Name of the single output socket of a node that declares no outputs
pub const DEFAULT_OUTPUT_NAME: &str = "output";

/// How an argument is passed for a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Only by position
    PositionalOnly,
    /// By position or by name
    PositionalOrKeyword,
    /// `*args`
    VarPositional,
    /// Only by name
    KeywordOnly,
    /// `**kwargs`
    VarKeyword,
}

impl ParameterKind {
    /// Variable-kind parameters accept subparameters
    pub fn is_variable(self) -> bool {
        matches!(self, Self::VarPositional | Self::VarKeyword)
    }

    /// Positional-only or positional-or-keyword
    pub fn is_positional(self) -> bool {
        matches!(self, Self::PositionalOnly | Self::PositionalOrKeyword)
    }
}

/// A single parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Parameter kind
    pub kind: ParameterKind,
    /// Default value, if the parameter has one
    pub default: Option<Value>,
}

impl Parameter {
    /// Create a parameter without default
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Positional-or-keyword shorthand
    pub fn positional(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::PositionalOrKeyword)
    }
}

/// Parameters plus declared output names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    /// Parameters in declaration order
    pub parameters: Vec<Parameter>,
    /// Declared output names; empty means a single default output
    pub outputs: Vec<String>,
}

impl Signature {
    /// Create a signature with a single default output
    pub fn new(parameters: Vec<Parameter>) -> Self {
        Self {
            parameters,
            outputs: Vec::new(),
        }
    }

    /// Declare named outputs
    pub fn with_outputs<S: Into<String>>(mut self, outputs: impl IntoIterator<Item = S>) -> Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Get a parameter by name
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Names of the output sockets a node built from this signature exposes
    pub fn output_names(&self) -> Vec<String> {
        if self.outputs.is_empty() {
            vec![DEFAULT_OUTPUT_NAME.to_string()]
        } else {
            self.outputs.clone()
        }
    }

    /// Names of variable-kind parameters
    pub fn variable_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.kind.is_variable())
    }

    /// Bind call arguments to parameters.
    ///
    /// Var-positional parameters receive a tuple and var-keyword parameters a
    /// mapping, both possibly empty. Missing parameters take their defaults.
    pub fn bind(&self, args: CallArgs) -> Result<BoundArguments, CallError> {
        let CallArgs {
            positional,
            keyword,
        } = args;
        let mut values: IndexMap<String, Value> = IndexMap::new();

        let positional_params: Vec<&Parameter> =
            self.parameters.iter().filter(|p| p.kind.is_positional()).collect();
        let var_positional = self
            .parameters
            .iter()
            .find(|p| p.kind == ParameterKind::VarPositional);
        let var_keyword = self
            .parameters
            .iter()
            .find(|p| p.kind == ParameterKind::VarKeyword);

        let mut extra = Vec::new();
        for (index, value) in positional.into_iter().enumerate() {
            match positional_params.get(index) {
                Some(param) => {
                    values.insert(param.name.clone(), value);
                }
                None => extra.push(value),
            }
        }
        if !extra.is_empty() && var_positional.is_none() {
            return Err(CallError::type_error(format!(
                "takes {} positional arguments but {} were given",
                positional_params.len(),
                positional_params.len() + extra.len()
            )));
        }

        let mut extra_keywords = IndexMap::new();
        for (name, value) in keyword {
            let target = self
                .parameters
                .iter()
                .find(|p| p.name == name && !p.kind.is_variable());
            match target {
                Some(param) if param.kind != ParameterKind::PositionalOnly => {
                    if values.contains_key(&name) {
                        return Err(CallError::type_error(format!(
                            "got multiple values for argument '{name}'"
                        )));
                    }
                    values.insert(name, value);
                }
                Some(_) | None if var_keyword.is_some() => {
                    extra_keywords.insert(name, value);
                }
                Some(_) => {
                    return Err(CallError::type_error(format!(
                        "positional-only argument '{name}' passed as keyword"
                    )));
                }
                None => {
                    return Err(CallError::type_error(format!(
                        "got an unexpected keyword argument '{name}'"
                    )));
                }
            }
        }

        let mut bound = IndexMap::new();
        let mut missing = Vec::new();
        for param in &self.parameters {
            let value = match param.kind {
                ParameterKind::VarPositional => Value::Tuple(std::mem::take(&mut extra)),
                ParameterKind::VarKeyword => Value::Map(std::mem::take(&mut extra_keywords)),
                _ => match values.swap_remove(&param.name).or_else(|| param.default.clone()) {
                    Some(value) => value,
                    None => {
                        missing.push(param.name.clone());
                        continue;
                    }
                },
            };
            bound.insert(param.name.clone(), value);
        }
        if !missing.is_empty() {
            return Err(CallError::type_error(format!(
                "missing required arguments: {}",
                missing.join(", ")
            )));
        }

        Ok(BoundArguments { values: bound })
    }
}

/// Arguments bound to parameter names
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArguments {
    values: IndexMap<String, Value>,
}

impl BoundArguments {
    /// Get a bound value
    pub fn get(&self, name: &str) -> Result<&Value, CallError> {
        self.values
            .get(name)
            .ok_or_else(|| CallError::type_error(format!("no argument named '{name}'")))
    }

    /// Take ownership of a bound value
    pub fn take(&mut self, name: &str) -> Result<Value, CallError> {
        self.values
            .swap_remove(name)
            .ok_or_else(|| CallError::type_error(format!("no argument named '{name}'")))
    }

    /// Integer argument
    pub fn int(&self, name: &str) -> Result<i64, CallError> {
        let value = self.get(name)?;
        value.as_int().ok_or_else(|| {
            CallError::type_error(format!("'{name}' must be int, not {}", value.type_name()))
        })
    }

    /// Numeric argument
    pub fn float(&self, name: &str) -> Result<f64, CallError> {
        let value = self.get(name)?;
        value.as_float().ok_or_else(|| {
            CallError::type_error(format!("'{name}' must be a number, not {}", value.type_name()))
        })
    }

    /// Text argument
    pub fn str(&self, name: &str) -> Result<&str, CallError> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| {
            CallError::type_error(format!("'{name}' must be str, not {}", value.type_name()))
        })
    }

    /// Items collected by a var-positional parameter
    pub fn var_positional(&self, name: &str) -> Result<&[Value], CallError> {
        match self.get(name)? {
            Value::Tuple(items) => Ok(items),
            other => Err(CallError::type_error(format!(
                "'{name}' must be a tuple, not {}",
                other.type_name()
            ))),
        }
    }

    /// Entries collected by a var-keyword parameter
    pub fn var_keyword(&self, name: &str) -> Result<&IndexMap<String, Value>, CallError> {
        match self.get(name)? {
            Value::Map(map) => Ok(map),
            other => Err(CallError::type_error(format!(
                "'{name}' must be a dict, not {}",
                other.type_name()
            ))),
        }
    }
}
