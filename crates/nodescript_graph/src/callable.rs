// SPDX-License-Identifier: MIT OR Apache-2.0
//! Native callables wrapped by nodes.

use crate::signature::{BoundArguments, Signature};
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Error raised from inside a callable
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// Wrong argument shape or operand type
    #[error("TypeError: {0}")]
    Type(String),

    /// Right type, unacceptable value
    #[error("ValueError: {0}")]
    Value(String),

    /// Missing mapping key
    #[error("KeyError: {0}")]
    Key(String),

    /// Sequence index out of range
    #[error("IndexError: {0}")]
    Index(String),

    /// Division or modulo by zero
    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(String),

    /// Anything else raised by user code
    #[error("{0}")]
    Custom(String),
}

impl CallError {
    /// Build a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Build a value error
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }
}

/// Arguments of one invocation, already laid out by parameter kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Positional arguments, in order
    pub positional: Vec<Value>,
    /// Keyword arguments, in order
    pub keyword: IndexMap<String, Value>,
}

impl CallArgs {
    /// Create empty arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional-only convenience constructor
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            keyword: IndexMap::new(),
        }
    }

    /// Add a keyword argument
    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(name.into(), value);
        self
    }

    /// Bind against a signature
    pub fn bind(self, signature: &Signature) -> Result<BoundArguments, CallError> {
        signature.bind(self)
    }
}

/// Function body of a native callable
pub type NativeFn = dyn Fn(CallArgs) -> Result<Value, CallError> + Send + Sync;

/// A named native function with optional introspection metadata
pub struct NativeCallable {
    name: String,
    signature: Option<Signature>,
    func: Arc<NativeFn>,
    source: Option<String>,
    dismiss_exec_time_tracking: bool,
}

/// Shared handle to a [`NativeCallable`].
///
/// Equality and hashing are by identity, so a callable can key the
/// signature map the same way the loader registered it.
#[derive(Clone)]
pub struct Callable(Arc<NativeCallable>);

impl Callable {
    /// Wrap a closure. Without a signature the callable cannot be introspected.
    pub fn new<F>(name: impl Into<String>, signature: Option<Signature>, func: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self(Arc::new(NativeCallable {
            name: name.into(),
            signature,
            func: Arc::new(func),
            source: None,
            dismiss_exec_time_tracking: false,
        }))
    }

    /// Wrap a closure that receives its arguments bound to `signature`
    pub fn with_bound<F>(name: impl Into<String>, signature: Signature, func: F) -> Self
    where
        F: Fn(BoundArguments) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        let binding = signature.clone();
        Self::new(name, Some(signature), move |args| func(binding.bind(args)?))
    }

    /// Attach source text emitted when the callable is exported
    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.rebuild(|inner| inner.source = Some(source.into()))
    }

    /// Exclude this callable from execution time totals
    pub fn dismissing_exec_time(self) -> Self {
        self.rebuild(|inner| inner.dismiss_exec_time_tracking = true)
    }

    fn rebuild(self, edit: impl FnOnce(&mut NativeCallable)) -> Self {
        let mut inner = NativeCallable {
            name: self.0.name.clone(),
            signature: self.0.signature.clone(),
            func: Arc::clone(&self.0.func),
            source: self.0.source.clone(),
            dismiss_exec_time_tracking: self.0.dismiss_exec_time_tracking,
        };
        edit(&mut inner);
        Self(Arc::new(inner))
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Introspected signature, if any
    pub fn signature(&self) -> Option<&Signature> {
        self.0.signature.as_ref()
    }

    /// Export source, if any
    pub fn source(&self) -> Option<&str> {
        self.0.source.as_deref()
    }

    /// Whether execution time of this callable is left out of run totals
    pub fn dismisses_exec_time_tracking(&self) -> bool {
        self.0.dismiss_exec_time_tracking
    }

    /// Invoke the callable
    pub fn call(&self, args: CallArgs) -> Result<Value, CallError> {
        (self.0.func)(args)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Callable {}

impl Hash for Callable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callable {}>", self.0.name)
    }
}
