// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution core for node-based visual scripts.
//!
//! A script is a graph of nodes wrapping native callables. Edges connect
//! output sockets to input sockets; proxy nodes hold literal data or relay
//! another socket's value. This crate provides:
//! - Node pack discovery and loading ([`loader`])
//! - The persisted document and the live graph ([`document`], [`graph`])
//! - Dependency-ordered execution ([`scheduler`])
//! - Export to a standalone Python script ([`export`])
//! - A facade tying it together for hosts ([`engine`])
//!
//! ## Architecture
//!
//! Values flow through the graph as dynamic [`Value`]s. Each node lays its
//! received arguments out against the callable's [`Signature`] and invokes
//! it, then pushes the result to every child socket.

pub mod callable;
pub mod config;
pub mod definition;
pub mod document;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod library;
pub mod loader;
pub mod marshal;
pub mod node;
pub mod scheduler;
pub mod signature;
pub mod socket;
pub mod socket_tree;
pub mod stdout;
pub mod value;

pub use callable::{CallArgs, CallError, Callable};
pub use config::EngineConfig;
pub use definition::{DefinitionKind, NodeDefinition, ScriptId};
pub use document::{DocumentFormat, GraphDocument};
pub use engine::{Engine, HostNotifier, Notification, RecordingNotifier, TracingNotifier};
pub use error::{
    ConfigError, DocumentError, EdgeError, EngineError, ExecutionError, ExportError, LoadError,
};
pub use graph::{Graph, TextBlock};
pub use library::{InstalledCategory, InstalledPack, NativeLibrary};
pub use loader::{ModuleCache, NodeRegistry, PackLoader, ScriptManifest};
pub use node::{Node, NodeId, NodeRecord, WidgetRecord};
pub use scheduler::{RunOutcome, RunReport, Scheduler};
pub use signature::{Parameter, ParameterKind, Signature};
pub use socket::SocketId;
pub use value::Value;
