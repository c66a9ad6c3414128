// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions: what a node wraps, independent of any graph.

use crate::callable::{CallArgs, CallError, Callable};
use crate::signature::Signature;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// `(pack, category, script)` triple identifying a script node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct ScriptId {
    /// Node pack name
    pub pack: String,
    /// Category directory name
    pub category: String,
    /// Script directory name
    pub script: String,
}

impl ScriptId {
    /// Create a script id
    pub fn new(
        pack: impl Into<String>,
        category: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            pack: pack.into(),
            category: category.into(),
            script: script.into(),
        }
    }

    /// Dotted module key, `pack.category.script`
    pub fn module_key(&self) -> String {
        format!("{}.{}.{}", self.pack, self.category, self.script)
    }
}

impl From<(String, String, String)> for ScriptId {
    fn from((pack, category, script): (String, String, String)) -> Self {
        Self {
            pack,
            category,
            script,
        }
    }
}

impl From<ScriptId> for (String, String, String) {
    fn from(id: ScriptId) -> Self {
        (id.pack, id.category, id.script)
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.pack, self.category, self.script)
    }
}

/// Which family a definition comes from, with its id in that family
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    /// User script from a node pack
    Script(ScriptId),
    /// Built-in operator
    Operator(String),
    /// Built-in function
    Builtin(String),
    /// Standard library callable
    Stdlib(String),
    /// Third-party callable
    ThirdParty(String),
    /// Code snippet
    Capsule(String),
    /// General viewer
    GenViewer(String),
}

impl DefinitionKind {
    /// Record field naming this kind
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Script(_) => "script_id",
            Self::Operator(_) => "operation_id",
            Self::Builtin(_) => "builtin_id",
            Self::Stdlib(_) => "stlib_id",
            Self::ThirdParty(_) => "thirdlib_id",
            Self::Capsule(_) => "capsule_id",
            Self::GenViewer(_) => "genviewer_id",
        }
    }

    /// Whether execution and export go through substitution code
    pub fn is_substituted(&self) -> bool {
        matches!(self, Self::Operator(_) | Self::Capsule(_))
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(id) => write!(f, "{id}"),
            Self::Operator(id)
            | Self::Builtin(id)
            | Self::Stdlib(id)
            | Self::ThirdParty(id)
            | Self::Capsule(id)
            | Self::GenViewer(id) => write!(f, "{id}"),
        }
    }
}

/// Everything a node needs from what it wraps
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    /// Family and id
    pub kind: DefinitionKind,
    /// Callable invoked on execution
    pub main_callable: Callable,
    /// Callable the signature was taken from, when not the main one
    pub signature_callable: Option<Callable>,
    /// Signature driving sockets and argument layout
    pub signature: Signature,
    /// Produces code text from a mapping of names to expressions
    pub substitution_callable: Option<Callable>,
    /// Expression the exporter uses to refer to the main callable
    pub call_format: Option<String>,
    /// Standard library import line(s)
    pub stlib_import_text: Option<String>,
    /// Third-party import line(s)
    pub third_lib_import_text: Option<String>,
    /// Invoked instead of the main callable, returning visuals and output
    pub backdoor: Option<Callable>,
    /// Derives visuals from the main callable's return value
    pub side_visual_from_output: Option<Callable>,
    /// Script file, for script definitions
    pub script_path: Option<PathBuf>,
}

impl NodeDefinition {
    /// Definition with only a main callable and its signature
    pub fn new(kind: DefinitionKind, main_callable: Callable, signature: Signature) -> Self {
        Self {
            kind,
            main_callable,
            signature_callable: None,
            signature,
            substitution_callable: None,
            call_format: None,
            stlib_import_text: None,
            third_lib_import_text: None,
            backdoor: None,
            side_visual_from_output: None,
            script_path: None,
        }
    }

    /// Default display title
    pub fn title(&self) -> String {
        match &self.kind {
            DefinitionKind::Script(id) => id.script.clone(),
            DefinitionKind::Operator(op) => op.clone(),
            _ => self.main_callable.name().to_string(),
        }
    }

    /// Name the exporter uses to refer to the main callable
    pub fn export_name(&self) -> &str {
        self.call_format
            .as_deref()
            .unwrap_or_else(|| self.main_callable.name())
    }

    /// Whether this node's run time is left out of totals
    pub fn dismisses_exec_time_tracking(&self) -> bool {
        self.signature_callable
            .as_ref()
            .unwrap_or(&self.main_callable)
            .dismisses_exec_time_tracking()
    }

    /// Render substitution code for the given name to expression mapping
    pub fn substitute(&self, names: IndexMap<String, String>) -> Option<Result<String, CallError>> {
        let substitution = self.substitution_callable.as_ref()?;
        let mapping = names.into_iter().map(|(k, v)| (k, Value::Str(v))).collect();
        let result = substitution
            .call(CallArgs::positional([Value::Map(mapping)]))
            .and_then(|value| match value {
                Value::Str(text) => Ok(text),
                other => Err(CallError::type_error(format!(
                    "substitution must return str, not {}",
                    other.type_name()
                ))),
            });
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Parameter;

    #[test]
    fn test_script_id_serialises_as_sequence() {
        let id = ScriptId::new("demo", "math", "add");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"["demo","math","add"]"#);
        let back: ScriptId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.module_key(), "demo.math.add");
    }

    #[test]
    fn test_dismissal_prefers_signature_callable() {
        let main = Callable::new("main", None, |_| Ok(Value::None));
        let sig = Callable::new("sig", Some(Signature::default()), |_| Ok(Value::None))
            .dismissing_exec_time();
        let mut definition = NodeDefinition::new(
            DefinitionKind::Builtin("main".to_string()),
            main,
            Signature::new(vec![Parameter::positional("x")]),
        );
        assert!(!definition.dismisses_exec_time_tracking());
        definition.signature_callable = Some(sig);
        assert!(definition.dismisses_exec_time_tracking());
        assert_eq!(definition.export_name(), "main");
    }
}
