// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy.
//!
//! Every error carries enough context (node id and title, parameter or
//! socket) for a host to point the user at the offending item.

use crate::callable::CallError;
use crate::definition::ScriptId;
use crate::node::NodeId;
use crate::socket::SocketId;
use std::fmt;
use std::path::PathBuf;

/// Error when the graph contains a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Graph contains a cycle")]
pub struct CycleError;

/// Error when validating or editing an edge
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EdgeError {
    /// Both endpoints can only be children
    #[error("TypeError: cannot connect two input sockets ({0} and {1})")]
    BothInputs(SocketId, SocketId),

    /// Both endpoints can only be parents
    #[error("TypeError: cannot connect two output sockets ({0} and {1})")]
    BothOutputs(SocketId, SocketId),

    /// The edge exists already
    #[error("ValueError: {parent} and {child} are already connected")]
    AlreadyConnected {
        /// Parent socket
        parent: SocketId,
        /// Child socket
        child: SocketId,
    },

    /// Both endpoints belong to the same node
    #[error("ValueError: {parent} and {child} belong to the same node")]
    SameNode {
        /// Parent socket
        parent: SocketId,
        /// Child socket
        child: SocketId,
    },

    /// The child's node already feeds the parent's node
    #[error("ValueError: connecting {parent} to {child} would create a cycle")]
    WouldCreateCycle {
        /// Parent socket
        parent: SocketId,
        /// Child socket
        child: SocketId,
    },

    /// The socket does not exist on its node
    #[error("ValueError: unknown socket {0}")]
    UnknownSocket(SocketId),

    /// No such edge
    #[error("ValueError: {parent} is not connected to {child}")]
    NotConnected {
        /// Parent socket
        parent: SocketId,
        /// Child socket
        child: SocketId,
    },
}

impl EdgeError {
    /// Whether this is a socket-kind mismatch rather than a graph-shape problem
    pub fn is_type_error(&self) -> bool {
        matches!(self, Self::BothInputs(..) | Self::BothOutputs(..))
    }
}

/// Problem with the shape of a node pack
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodePackError {
    /// Local node pack path does not exist
    #[error("node pack not found: {0}")]
    NotFound(PathBuf),

    /// Local node pack path is a file
    #[error("node pack is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Node pack has no category directory
    #[error("node pack has no category directory: {0}")]
    LackingCategory(PathBuf),

    /// Category has no script directory
    #[error("category has no script directory: {0}")]
    CategoryLackingScriptDirectory(PathBuf),

    /// Script directory has no script file
    #[error("script directory lacks its script file: {0}")]
    ScriptDirectoryLackingScript(PathBuf),

    /// Installed node pack is not registered with the native library
    #[error("installed node pack could not be imported: {0}")]
    NotImported(String),

    /// Directory name is not a valid identifier
    #[error("directory name is not a valid identifier: {0}")]
    InvalidDirectoryName(PathBuf),
}

/// One script that failed to load, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// Module key (`pack.category.script`)
    pub module_key: String,
    /// Human-readable reason
    pub reason: String,
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module_key, self.reason)
    }
}

/// Every script failure of a load, grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeScriptsError {
    /// A native symbol named by the script could not be resolved
    pub not_imported: Vec<ScriptFailure>,
    /// The script file could not be read or parsed
    pub not_loaded: Vec<ScriptFailure>,
    /// The script does not declare its main callable
    pub missing_definition: Vec<ScriptFailure>,
    /// The declared main callable is not callable
    pub not_callable: Vec<ScriptFailure>,
    /// No signature could be obtained
    pub not_inspectable: Vec<ScriptFailure>,
}

impl NodeScriptsError {
    /// Whether nothing failed
    pub fn is_empty(&self) -> bool {
        self.groups().iter().all(|(_, failures)| failures.is_empty())
    }

    /// Total number of failing scripts
    pub fn len(&self) -> usize {
        self.groups().iter().map(|(_, failures)| failures.len()).sum()
    }

    fn groups(&self) -> [(&'static str, &Vec<ScriptFailure>); 5] {
        [
            ("could not be imported", &self.not_imported),
            ("could not be loaded", &self.not_loaded),
            ("lack the main callable", &self.missing_definition),
            ("declare a main callable that is not callable", &self.not_callable),
            ("have a signature that could not be inspected", &self.not_inspectable),
        ]
    }
}

impl fmt::Display for NodeScriptsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node script(s) failed to load", self.len())?;
        for (label, failures) in self.groups() {
            if failures.is_empty() {
                continue;
            }
            write!(f, "\nscripts that {label}:")?;
            for failure in failures {
                write!(f, "\n  - {failure}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for NodeScriptsError {}

/// Error while loading node packs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Layout or import problem with a pack
    #[error(transparent)]
    Pack(#[from] NodePackError),

    /// One or more scripts failed
    #[error(transparent)]
    Scripts(#[from] NodeScriptsError),
}

/// Error while reading, writing or resolving a graph document
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// File could not be read or written
    #[error("could not access {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File contents could not be parsed
    #[error("could not parse {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Document could not be serialised
    #[error("could not serialise document: {0}")]
    Serialize(String),

    /// Script ids with no loaded definition
    #[error("document references node scripts that were not loaded: {}", format_missing(.0))]
    MissingNodeScripts(Vec<(NodeId, ScriptId)>),

    /// A built-in node id that the native library does not provide
    #[error("node {node_id} references unknown {tag} '{id}'")]
    UnknownNodeKind {
        /// Node id
        node_id: NodeId,
        /// Kind tag (`operation_id`, `builtin_id`, ...)
        tag: &'static str,
        /// Referenced id
        id: String,
    },

    /// A node record carries more than one kind tag
    #[error("node {0} carries more than one kind tag")]
    AmbiguousNodeKind(NodeId),

    /// Two node records share an id
    #[error("duplicate node id {0}")]
    DuplicateNodeId(NodeId),

    /// A socket record could not be decoded
    #[error("invalid socket record: {0}")]
    InvalidSocket(String),

    /// A socket refers to a missing node or parameter
    #[error("socket {0} does not exist")]
    UnknownSocket(SocketId),

    /// A socket appears as a child of more than one parent
    #[error("socket {0} has more than one parent")]
    DuplicateChild(SocketId),

    /// The persisted edges contain a cycle
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

fn format_missing(missing: &[(NodeId, ScriptId)]) -> String {
    missing
        .iter()
        .map(|(node_id, script_id)| format!("{script_id} (node {node_id})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error raised while executing a graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Parameters with no edge, no widget and no default
    #[error("node '{node_title}' (id {node_id}) lacks input for: {}", .params.join(", "))]
    LackOfInput {
        /// Node id
        node_id: NodeId,
        /// Node title
        node_title: String,
        /// Offending parameter names
        params: Vec<String>,
    },

    /// Data nodes with neither widget nor incoming edge
    #[error("proxy nodes lack data (no widget and no incoming edge): {node_ids:?}")]
    ProxyNodesLackingData {
        /// Offending node ids
        node_ids: Vec<NodeId>,
    },

    /// Return value does not provide every declared output
    #[error(
        "node '{node_title}' (id {node_id}) must return a mapping with keys {}: {reason}",
        .expected.join(", ")
    )]
    UnexpectedOutput {
        /// Node id
        node_id: NodeId,
        /// Node title
        node_title: String,
        /// Declared output names
        expected: Vec<String>,
        /// What was wrong with the return value
        reason: String,
    },

    /// A var-positional subparameter tagged for unpacking is not iterable
    #[error(
        "node '{node_title}' (id {node_id}): subparameter {subparam_index} of '{param}' \
         must be iterable to be unpacked, not {type_name}"
    )]
    PositionalSubparameterUnpacking {
        /// Node id
        node_id: NodeId,
        /// Node title
        node_title: String,
        /// Var-positional parameter
        param: String,
        /// Subparameter index
        subparam_index: usize,
        /// Type of the offending value
        type_name: String,
    },

    /// A var-keyword subparameter tagged for unpacking is not a mapping
    #[error(
        "node '{node_title}' (id {node_id}): subparameter {subparam_index} of '{param}' \
         must be a mapping to be unpacked, not {type_name}"
    )]
    KeywordSubparameterUnpacking {
        /// Node id
        node_id: NodeId,
        /// Node title
        node_title: String,
        /// Var-keyword parameter
        param: String,
        /// Subparameter index
        subparam_index: usize,
        /// Type of the offending value
        type_name: String,
    },

    /// The node's callable raised
    #[error("node '{node_title}' (id {node_id}) raised an error")]
    NodeCallable {
        /// Node id
        node_id: NodeId,
        /// Node title
        node_title: String,
        /// Original error
        #[source]
        source: CallError,
    },

    /// The nodes to sort contain a cycle
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

impl ExecutionError {
    /// Errors whose own message is shown to the user, as opposed to errors
    /// reported by pointing the user at the log
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::LackOfInput { .. }
                | Self::ProxyNodesLackingData { .. }
                | Self::UnexpectedOutput { .. }
                | Self::PositionalSubparameterUnpacking { .. }
                | Self::KeywordSubparameterUnpacking { .. }
        )
    }

    /// Node the error is attributed to, if a single one
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::LackOfInput { node_id, .. }
            | Self::UnexpectedOutput { node_id, .. }
            | Self::PositionalSubparameterUnpacking { node_id, .. }
            | Self::KeywordSubparameterUnpacking { node_id, .. }
            | Self::NodeCallable { node_id, .. } => Some(*node_id),
            Self::ProxyNodesLackingData { .. } | Self::Cycle(_) => None,
        }
    }
}

/// Error while exporting a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    /// Proxy nodes with neither widget nor parent
    #[error("RuntimeError: orphan proxy nodes have no data to export: {0:?}")]
    OrphanProxyNodes(Vec<NodeId>),

    /// The graph contains a cycle
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Error reading or writing engine configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents could not be parsed
    #[error("config parse error: {0}")]
    Parse(String),

    /// File was written by a newer version
    #[error("config version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest supported version
        supported: u32,
    },
}

/// Any error surfaced by the engine facade
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No document is loaded
    #[error("no graph document is loaded")]
    NoDocument,

    /// Node pack loading failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Document problem
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Execution failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Export failed
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Edge edit rejected
    #[error(transparent)]
    Edge(#[from] EdgeError),

    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),
}
