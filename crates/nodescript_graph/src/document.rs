// SPDX-License-Identifier: MIT OR Apache-2.0
//! The persisted graph document.
//!
//! Documents are JSON or RON mappings with the keys `node_packs`,
//! `installed_node_packs`, `nodes`, `parent_sockets` and `text_blocks`.

use crate::definition::NodeDefinition;
use crate::error::DocumentError;
use crate::graph::{Graph, TextBlock};
use crate::library::NativeLibrary;
use crate::loader::NodeRegistry;
use crate::node::{Node, NodeRecord};
use crate::socket_tree::{SocketRecord, SocketTree};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// On-disk encoding of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `serde_json`
    Json,
    /// `ron`
    Ron,
}

impl DocumentFormat {
    /// Format implied by a file extension, if any
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::Json),
            "ron" => Some(Self::Ron),
            _ => None,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
    })
}

/// A persisted graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Local node pack directories
    #[serde(default, deserialize_with = "one_or_many")]
    pub node_packs: Vec<String>,
    /// Installed node pack names
    #[serde(default, deserialize_with = "one_or_many")]
    pub installed_node_packs: Vec<String>,
    /// Node records keyed by their id as a string
    #[serde(default)]
    pub nodes: IndexMap<String, NodeRecord>,
    /// One record per parent socket
    #[serde(default)]
    pub parent_sockets: Vec<SocketRecord>,
    /// Free text blocks
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
}

impl GraphDocument {
    /// Read a document, choosing the format from the extension and trying
    /// JSON then RON for anything else
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = match DocumentFormat::from_path(path) {
            Some(format) => Self::parse(&text, format),
            None => Self::parse(&text, DocumentFormat::Json)
                .or_else(|_| Self::parse(&text, DocumentFormat::Ron)),
        };
        let document = parsed.map_err(|message| DocumentError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        tracing::info!("Loaded document {} ({} node(s))", path.display(), document.nodes.len());
        Ok(document)
    }

    /// Parse document text
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self, String> {
        match format {
            DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            DocumentFormat::Ron => ron::from_str(text).map_err(|e| e.to_string()),
        }
    }

    /// Render document text
    pub fn render(&self, format: DocumentFormat) -> Result<String, DocumentError> {
        match format {
            DocumentFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| DocumentError::Serialize(e.to_string())),
            DocumentFormat::Ron => {
                ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                    .map_err(|e| DocumentError::Serialize(e.to_string()))
            }
        }
    }

    /// Write the document; extensions other than `.ron` get JSON
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let format = DocumentFormat::from_path(path).unwrap_or(DocumentFormat::Json);
        let text = self.render(format)?;
        std::fs::write(path, text).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Saved document to {}", path.display());
        Ok(())
    }

    /// Local pack paths, relative ones taken from `base`
    pub fn pack_paths(&self, base: Option<&Path>) -> Vec<PathBuf> {
        self.node_packs
            .iter()
            .map(|pack| {
                let path = PathBuf::from(pack);
                match base {
                    Some(base) if path.is_relative() => base.join(path),
                    _ => path,
                }
            })
            .collect()
    }

    /// Build the live graph, resolving every record's kind tag against the
    /// loaded scripts and the native library
    pub fn resolve(
        &self,
        library: &NativeLibrary,
        registry: &NodeRegistry,
    ) -> Result<Graph, DocumentError> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut missing = Vec::new();
        for (key, record) in &self.nodes {
            if *key != record.id.to_string() {
                tracing::warn!("Node record keyed '{}' has id {}", key, record.id);
            }
            let definition = match resolve_definition(record, library, registry) {
                Ok(definition) => definition,
                Err(DocumentError::MissingNodeScripts(mut ids)) => {
                    missing.append(&mut ids);
                    continue;
                }
                Err(error) => return Err(error),
            };
            let mut node = Node::new(record.clone(), None);
            if let Some(definition) = definition {
                node.set_definition(definition);
            }
            nodes.push(node);
        }
        if !missing.is_empty() {
            return Err(DocumentError::MissingNodeScripts(missing));
        }

        let tree = SocketTree::from_records(&self.parent_sockets)?;
        Graph::from_parts(nodes, tree, self.text_blocks.clone())
    }

    /// Snapshot a live graph
    pub fn from_graph(graph: &Graph, node_packs: Vec<String>, installed_node_packs: Vec<String>) -> Self {
        Self {
            node_packs,
            installed_node_packs,
            nodes: graph
                .nodes()
                .map(|node| (node.id().to_string(), node.record().clone()))
                .collect(),
            parent_sockets: graph.tree().to_records(),
            text_blocks: graph.text_blocks().to_vec(),
        }
    }
}

/// Definition named by a record's kind tag; `None` for proxies
pub(crate) fn resolve_definition(
    record: &NodeRecord,
    library: &NativeLibrary,
    registry: &NodeRegistry,
) -> Result<Option<Arc<NodeDefinition>>, DocumentError> {
    let tags = record.kind_tags();
    if tags.len() > 1 {
        return Err(DocumentError::AmbiguousNodeKind(record.id));
    }
    let Some((tag, id)) = tags.into_iter().next() else {
        return Ok(None);
    };
    if let Some(script_id) = &record.script_id {
        return match registry.node_def_map.get(script_id) {
            Some(definition) => Ok(Some(Arc::clone(definition))),
            None => Err(DocumentError::MissingNodeScripts(vec![(record.id, script_id.clone())])),
        };
    }
    library
        .lookup(tag, &id)
        .map(Some)
        .ok_or(DocumentError::UnknownNodeKind {
            node_id: record.id,
            tag,
            id,
        })
}
