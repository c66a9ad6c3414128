// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node pack loading.
//!
//! A node pack is a directory of category directories, each holding script
//! directories, each holding a [`SCRIPT_FILE_NAME`] manifest. Installed packs
//! carry the same structure in memory through the [`NativeLibrary`].
//!
//! Layout problems abort at the first one found. Script problems are
//! collected across every pack and reported together.

use crate::callable::Callable;
use crate::definition::{DefinitionKind, NodeDefinition, ScriptId};
use crate::error::{LoadError, NodePackError, NodeScriptsError, ScriptFailure};
use crate::library::NativeLibrary;
use crate::signature::Signature;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Manifest file every script directory must contain
pub const SCRIPT_FILE_NAME: &str = "__main__.ron";

/// Optional category metadata file
pub const CATEGORY_METADATA_FILE_NAME: &str = ".metadata.pyl";

/// Default number of category colour slots
pub const DEFAULT_PALETTE_SIZE: usize = 12;

/// Reference to a module-level value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolRef {
    /// Symbol path registered in the native library
    Native(String),
    /// Inline literal
    Literal(Value),
}

/// Module-level names a script declares
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptManifest {
    /// The node's callable
    pub main_callable: Option<SymbolRef>,
    /// Callable the displayed signature is taken from
    pub signature_callable: Option<SymbolRef>,
    /// Code template producer for snippet-like scripts
    pub substitution_callable: Option<SymbolRef>,
    /// Expression the exporter uses to refer to the callable
    pub call_format: Option<String>,
    /// Standard library imports the callable needs
    pub stlib_import_text: Option<String>,
    /// Third-party imports the callable needs
    pub third_lib_import_text: Option<String>,
    /// Called instead of the main callable, returning visuals and output
    #[serde(alias = "viewer_backdoor", alias = "preview_backdoor")]
    pub backdoor: Option<SymbolRef>,
    /// Derives visuals from the main callable's return value
    #[serde(alias = "viewer_from_output")]
    pub side_visual_from_output: Option<SymbolRef>,
}

impl ScriptManifest {
    /// Manifest naming a native main callable
    pub fn native(path: impl Into<String>) -> Self {
        Self {
            main_callable: Some(SymbolRef::Native(path.into())),
            ..Self::default()
        }
    }

    /// Parse manifest text
    pub fn parse(text: &str) -> Result<Self, String> {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(text)
            .map_err(|e| e.to_string())
    }
}

/// Parsed manifests keyed by `pack.category.script`, with the keys each
/// pack contributed so a pack can be evicted as a unit
#[derive(Debug, Clone, Default)]
pub struct ModuleCache {
    modules: IndexMap<String, ScriptManifest>,
    pack_keys: IndexMap<String, Vec<String>>,
}

impl ModuleCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached manifest
    pub fn get(&self, key: &str) -> Option<&ScriptManifest> {
        self.modules.get(key)
    }

    /// Cache a manifest under a pack
    pub fn insert(&mut self, pack: &str, key: String, manifest: ScriptManifest) {
        self.pack_keys.entry(pack.to_string()).or_default().push(key.clone());
        self.modules.insert(key, manifest);
    }

    /// Evict exactly the keys a pack contributed, returning how many
    pub fn evict_pack(&mut self, pack: &str) -> usize {
        let keys = self.pack_keys.shift_remove(pack).unwrap_or_default();
        keys.iter()
            .filter(|key| self.modules.shift_remove(key.as_str()).is_some())
            .count()
    }

    /// Number of cached modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// What loading produced
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    /// Definitions by script id
    pub node_def_map: IndexMap<ScriptId, Arc<NodeDefinition>>,
    /// Signatures by the callable they describe
    pub signature_map: HashMap<Callable, Signature>,
    /// Manifest path of local scripts
    pub script_path_map: IndexMap<ScriptId, PathBuf>,
    /// Directory of local categories, keyed by `(pack, category)`
    pub category_path_map: IndexMap<(String, String), PathBuf>,
    /// Colour slot of every category, keyed by `(pack, category)`
    pub category_index_map: IndexMap<(String, String), usize>,
    /// Packs with at least one script loaded
    pub known_packs: IndexSet<String>,
}

/// Whether `name` can name a module
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_alphabetic() => {
            chars.all(|c| c == '_' || c.is_alphanumeric())
        }
        _ => false,
    }
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name == "__pycache__"
}

/// Immediate subdirectories of `path` that are not ignored, sorted by name.
///
/// Symlinked directories count; entries that cannot be read are skipped with
/// a warning.
fn subdirectories(path: &Path) -> Result<Vec<(String, PathBuf)>, NodePackError> {
    let mut found = Vec::new();
    let walker = WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", path.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored(&name) {
            continue;
        }
        if !is_identifier(&name) {
            return Err(NodePackError::InvalidDirectoryName(entry.into_path()));
        }
        found.push((name, entry.into_path()));
    }
    Ok(found)
}

fn read_color_index(category_dir: &Path) -> Option<i64> {
    let path = category_dir.join(CATEGORY_METADATA_FILE_NAME);
    let text = std::fs::read_to_string(&path).ok()?;
    let parsed: Result<Value, String> = serde_json::from_str(&text)
        .or_else(|_| ron::from_str(&text))
        .map_err(|e: ron::error::SpannedError| e.to_string());
    match parsed {
        Ok(metadata) => metadata
            .as_map()
            .and_then(|map| map.get("color_index"))
            .and_then(Value::as_int),
        Err(e) => {
            tracing::warn!("Ignoring unreadable category metadata {}: {}", path.display(), e);
            None
        }
    }
}

enum ScriptSource<'m> {
    File(PathBuf),
    Installed(&'m ScriptManifest),
}

/// Resolves node packs into a [`NodeRegistry`]
pub struct PackLoader<'a> {
    library: &'a NativeLibrary,
    cache: &'a mut ModuleCache,
    palette_size: usize,
    registry: NodeRegistry,
    failures: NodeScriptsError,
    next_color: usize,
}

impl<'a> PackLoader<'a> {
    /// Create a loader resolving symbols from `library`
    pub fn new(library: &'a NativeLibrary, cache: &'a mut ModuleCache) -> Self {
        Self {
            library,
            cache,
            palette_size: DEFAULT_PALETTE_SIZE,
            registry: NodeRegistry::default(),
            failures: NodeScriptsError::default(),
            next_color: 0,
        }
    }

    /// Set the number of category colour slots
    pub fn with_palette_size(mut self, palette_size: usize) -> Self {
        self.palette_size = palette_size.max(1);
        self
    }

    /// Load local packs, then installed packs
    pub fn load(
        mut self,
        local_packs: &[PathBuf],
        installed_packs: &[String],
    ) -> Result<NodeRegistry, LoadError> {
        for path in local_packs {
            self.load_local_pack(path)?;
        }
        for name in installed_packs {
            self.load_installed_pack(name)?;
        }

        if !self.failures.is_empty() {
            tracing::error!("{}", self.failures);
            return Err(LoadError::Scripts(self.failures));
        }
        tracing::info!(
            "Loaded {} node script(s) from {} pack(s)",
            self.registry.node_def_map.len(),
            self.registry.known_packs.len()
        );
        Ok(self.registry)
    }

    fn load_local_pack(&mut self, path: &Path) -> Result<(), NodePackError> {
        if !path.exists() {
            return Err(NodePackError::NotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(NodePackError::NotADirectory(path.to_path_buf()));
        }
        let pack = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_identifier(&pack) {
            return Err(NodePackError::InvalidDirectoryName(path.to_path_buf()));
        }

        let categories = subdirectories(path)?;
        if categories.is_empty() {
            return Err(NodePackError::LackingCategory(path.to_path_buf()));
        }

        let mut scripts = Vec::new();
        for (category, category_dir) in categories {
            let script_dirs = subdirectories(&category_dir)?;
            if script_dirs.is_empty() {
                return Err(NodePackError::CategoryLackingScriptDirectory(category_dir));
            }
            for (_, script_dir) in &script_dirs {
                let file = script_dir.join(SCRIPT_FILE_NAME);
                if !file.is_file() {
                    return Err(NodePackError::ScriptDirectoryLackingScript(script_dir.clone()));
                }
            }
            let color_index = read_color_index(&category_dir);
            self.register_category(&pack, &category, color_index);
            self.registry
                .category_path_map
                .insert((pack.clone(), category.clone()), category_dir);
            for (script, script_dir) in script_dirs {
                scripts.push((category.clone(), script, script_dir.join(SCRIPT_FILE_NAME)));
            }
        }

        tracing::info!("Loading node pack '{}' from {}", pack, path.display());
        for (category, script, file) in scripts {
            let id = ScriptId::new(&pack, category, script);
            self.load_script(id, ScriptSource::File(file));
        }
        self.cache.evict_pack(&pack);
        Ok(())
    }

    fn load_installed_pack(&mut self, name: &str) -> Result<(), NodePackError> {
        let library = self.library;
        let pack = library
            .installed_pack(name)
            .ok_or_else(|| NodePackError::NotImported(name.to_string()))?;
        if pack.categories.is_empty() {
            return Err(NodePackError::LackingCategory(PathBuf::from(name)));
        }
        tracing::info!("Loading installed node pack '{}'", name);
        for (category, contents) in &pack.categories {
            if !is_identifier(category) {
                return Err(NodePackError::InvalidDirectoryName(PathBuf::from(name).join(category)));
            }
            if contents.scripts.is_empty() {
                return Err(NodePackError::CategoryLackingScriptDirectory(
                    PathBuf::from(name).join(category),
                ));
            }
            self.register_category(name, category, contents.color_index.map(|i| i as i64));
            for (script, manifest) in &contents.scripts {
                if !is_identifier(script) {
                    return Err(NodePackError::InvalidDirectoryName(
                        PathBuf::from(name).join(category).join(script),
                    ));
                }
                let id = ScriptId::new(name, category.clone(), script.clone());
                self.load_script(id, ScriptSource::Installed(manifest));
            }
        }
        self.cache.evict_pack(name);
        Ok(())
    }

    fn register_category(&mut self, pack: &str, category: &str, color_index: Option<i64>) {
        let slot = match color_index {
            Some(index) => index.rem_euclid(self.palette_size as i64) as usize,
            None => {
                let slot = self.next_color % self.palette_size;
                self.next_color += 1;
                slot
            }
        };
        self.registry
            .category_index_map
            .insert((pack.to_string(), category.to_string()), slot);
    }

    fn fail(list: &mut Vec<ScriptFailure>, id: &ScriptId, reason: impl Into<String>) {
        list.push(ScriptFailure {
            module_key: id.module_key(),
            reason: reason.into(),
        });
    }

    fn load_script(&mut self, id: ScriptId, source: ScriptSource<'_>) {
        let key = id.module_key();
        let manifest = match self.cache.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                let parsed = match &source {
                    ScriptSource::File(path) => std::fs::read_to_string(path)
                        .map_err(|e| e.to_string())
                        .and_then(|text| ScriptManifest::parse(&text)),
                    ScriptSource::Installed(manifest) => Ok((*manifest).clone()),
                };
                match parsed {
                    Ok(manifest) => {
                        self.cache.insert(&id.pack, key.clone(), manifest.clone());
                        manifest
                    }
                    Err(reason) => {
                        Self::fail(&mut self.failures.not_loaded, &id, reason);
                        return;
                    }
                }
            }
        };

        let Some(main_ref) = &manifest.main_callable else {
            Self::fail(
                &mut self.failures.missing_definition,
                &id,
                "main_callable is not declared",
            );
            return;
        };
        let Some(main_callable) = self.resolve(&id, "main_callable", main_ref) else {
            return;
        };
        let mut optional = |field: &str, symbol: &Option<SymbolRef>| -> Result<Option<Callable>, ()> {
            match symbol {
                None => Ok(None),
                Some(symbol) => self.resolve(&id, field, symbol).map(Some).ok_or(()),
            }
        };
        let Ok(signature_callable) = optional("signature_callable", &manifest.signature_callable)
        else {
            return;
        };
        let Ok(substitution_callable) =
            optional("substitution_callable", &manifest.substitution_callable)
        else {
            return;
        };
        let Ok(backdoor) = optional("backdoor", &manifest.backdoor) else {
            return;
        };
        let Ok(side_visual_from_output) =
            optional("side_visual_from_output", &manifest.side_visual_from_output)
        else {
            return;
        };

        let inspected = signature_callable.as_ref().unwrap_or(&main_callable);
        let Some(signature) = inspected.signature().cloned() else {
            Self::fail(
                &mut self.failures.not_inspectable,
                &id,
                format!("no signature for '{}'", inspected.name()),
            );
            return;
        };

        let script_path = match &source {
            ScriptSource::File(path) => Some(path.clone()),
            ScriptSource::Installed(_) => None,
        };
        let mut definition =
            NodeDefinition::new(DefinitionKind::Script(id.clone()), main_callable.clone(), signature.clone());
        definition.signature_callable = signature_callable.clone();
        definition.substitution_callable = substitution_callable;
        definition.call_format = manifest.call_format.clone();
        definition.stlib_import_text = manifest.stlib_import_text.clone();
        definition.third_lib_import_text = manifest.third_lib_import_text.clone();
        definition.backdoor = backdoor;
        definition.side_visual_from_output = side_visual_from_output;
        definition.script_path = script_path.clone();

        tracing::debug!("Loaded node script {}", key);
        self.registry
            .signature_map
            .insert(signature_callable.unwrap_or(main_callable), signature);
        if let Some(path) = script_path {
            self.registry.script_path_map.insert(id.clone(), path);
        }
        self.registry.known_packs.insert(id.pack.clone());
        self.registry.node_def_map.insert(id, Arc::new(definition));
    }

    fn resolve(&mut self, id: &ScriptId, field: &str, symbol: &SymbolRef) -> Option<Callable> {
        match symbol {
            SymbolRef::Literal(value) => {
                Self::fail(
                    &mut self.failures.not_callable,
                    id,
                    format!("{field} is a {} literal", value.type_name()),
                );
                None
            }
            SymbolRef::Native(path) => match self.library.symbol(path) {
                Some(Value::Callable(callable)) => Some(callable.clone()),
                Some(other) => {
                    Self::fail(
                        &mut self.failures.not_callable,
                        id,
                        format!("{field} '{path}' is a {}", other.type_name()),
                    );
                    None
                }
                None => {
                    Self::fail(
                        &mut self.failures.not_imported,
                        id,
                        format!("{field} '{path}' is not registered"),
                    );
                    None
                }
            },
        }
    }
}
