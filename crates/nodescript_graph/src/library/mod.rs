// SPDX-License-Identifier: MIT OR Apache-2.0
//! Native library: the symbol table node definitions are resolved from.
//!
//! Script manifests name their callables by symbol path (`"demo.add"`);
//! built-in node families (operators, builtins, standard library,
//! snippets and viewers) are registered here as ready-made definitions.

mod builtins;
mod capsules;
mod operators;
mod stdlib;

use crate::callable::{CallError, Callable};
use crate::definition::{DefinitionKind, NodeDefinition};
use crate::loader::ScriptManifest;
use crate::signature::{Parameter, ParameterKind, Signature};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Scripts of one category of an installed node pack
#[derive(Debug, Clone, Default)]
pub struct InstalledCategory {
    /// Explicit colour slot
    pub color_index: Option<usize>,
    /// Script manifests by script name
    pub scripts: IndexMap<String, ScriptManifest>,
}

/// A node pack compiled into the host rather than read from disk
#[derive(Debug, Clone, Default)]
pub struct InstalledPack {
    /// Categories by name
    pub categories: IndexMap<String, InstalledCategory>,
}

impl InstalledPack {
    /// Create an empty pack
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script manifest
    pub fn with_script(
        mut self,
        category: impl Into<String>,
        script: impl Into<String>,
        manifest: ScriptManifest,
    ) -> Self {
        self.categories
            .entry(category.into())
            .or_default()
            .scripts
            .insert(script.into(), manifest);
        self
    }
}

/// Native symbols and built-in node definitions
#[derive(Debug, Clone, Default)]
pub struct NativeLibrary {
    symbols: IndexMap<String, Value>,
    operators: IndexMap<String, Arc<NodeDefinition>>,
    builtins: IndexMap<String, Arc<NodeDefinition>>,
    stdlib: IndexMap<String, Arc<NodeDefinition>>,
    third_party: IndexMap<String, Arc<NodeDefinition>>,
    capsules: IndexMap<String, Arc<NodeDefinition>>,
    genviewers: IndexMap<String, Arc<NodeDefinition>>,
    installed_packs: IndexMap<String, InstalledPack>,
}

impl NativeLibrary {
    /// Library with no symbols and no built-in nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with every built-in node family registered
    pub fn standard() -> Self {
        let mut library = Self::new();
        for (id, definition) in operators::definitions() {
            library.operators.insert(id, Arc::new(definition));
        }
        for (id, definition) in builtins::definitions() {
            library.builtins.insert(id, Arc::new(definition));
        }
        for (id, definition) in stdlib::definitions() {
            library.stdlib.insert(id, Arc::new(definition));
        }
        for (id, definition) in capsules::capsule_definitions() {
            library.capsules.insert(id, Arc::new(definition));
        }
        for (id, definition) in capsules::genviewer_definitions() {
            library.genviewers.insert(id, Arc::new(definition));
        }
        library
    }

    /// Register a symbol manifests can refer to
    pub fn register_symbol(&mut self, path: impl Into<String>, value: impl Into<Value>) {
        self.symbols.insert(path.into(), value.into());
    }

    /// Register a callable symbol
    pub fn register_callable(&mut self, path: impl Into<String>, callable: Callable) {
        self.register_symbol(path, Value::Callable(callable));
    }

    /// Register a third-party callable node.
    ///
    /// `import_text` is emitted at the top of exported scripts and
    /// `call_format` is how the exported script refers to the callable.
    pub fn register_third_party(
        &mut self,
        id: impl Into<String>,
        callable: Callable,
        import_text: impl Into<String>,
        call_format: impl Into<String>,
    ) -> Result<(), CallError> {
        let id = id.into();
        let signature = callable
            .signature()
            .cloned()
            .ok_or_else(|| CallError::type_error(format!("'{id}' has no signature")))?;
        let mut definition =
            NodeDefinition::new(DefinitionKind::ThirdParty(id.clone()), callable, signature);
        definition.third_lib_import_text = Some(import_text.into());
        definition.call_format = Some(call_format.into());
        self.third_party.insert(id, Arc::new(definition));
        Ok(())
    }

    /// Register an in-process node pack
    pub fn register_installed_pack(&mut self, name: impl Into<String>, pack: InstalledPack) {
        self.installed_packs.insert(name.into(), pack);
    }

    /// Resolve a symbol path
    pub fn symbol(&self, path: &str) -> Option<&Value> {
        self.symbols.get(path)
    }

    /// Installed pack by name
    pub fn installed_pack(&self, name: &str) -> Option<&InstalledPack> {
        self.installed_packs.get(name)
    }

    /// Built-in definition for a record kind tag
    pub fn lookup(&self, tag: &str, id: &str) -> Option<Arc<NodeDefinition>> {
        let family = match tag {
            "operation_id" => &self.operators,
            "builtin_id" => &self.builtins,
            "stlib_id" => &self.stdlib,
            "thirdlib_id" => &self.third_party,
            "capsule_id" => &self.capsules,
            "genviewer_id" => &self.genviewers,
            _ => return None,
        };
        family.get(id).cloned()
    }

    /// Ids available under a kind tag
    pub fn ids(&self, tag: &str) -> Vec<&str> {
        let family = match tag {
            "operation_id" => &self.operators,
            "builtin_id" => &self.builtins,
            "stlib_id" => &self.stdlib,
            "thirdlib_id" => &self.third_party,
            "capsule_id" => &self.capsules,
            "genviewer_id" => &self.genviewers,
            _ => return Vec::new(),
        };
        family.keys().map(String::as_str).collect()
    }
}

/// Substitution callable replacing `{name}` fields of `template` with the
/// expressions of the mapping it receives
pub fn template_substitution(name: &str, template: &str) -> Callable {
    let template = template.to_string();
    let signature = Signature::new(vec![Parameter::new("names", ParameterKind::PositionalOnly)]);
    Callable::with_bound(name, signature, move |bound| {
        let names = bound.get("names")?.as_map().ok_or_else(|| {
            CallError::type_error("substitution expects a mapping of names to expressions")
        })?;
        Ok(Value::Str(fill_fields(&template, |key| {
            names.get(key).map(ToString::to_string)
        })))
    })
}

/// Replace each `{field}` of `template` for which `lookup` has a value.
/// Fields are scanned once, so substituted text is never rescanned.
pub(crate) fn fill_fields(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}').map(|end| (&after[..end], end)) {
            Some((key, end)) if !key.contains('{') => {
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
