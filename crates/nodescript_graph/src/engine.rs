// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine facade used by hosts.
//!
//! The engine owns everything a session needs: the native library, the
//! loader registries and module cache, the live graph and the document it
//! came from. Every error is reported through the [`HostNotifier`] and also
//! returned, so interactive hosts can show dialogs while batch hosts simply
//! propagate.

use crate::config::EngineConfig;
use crate::document::{resolve_definition, GraphDocument};
use crate::error::{DocumentError, EdgeError, EngineError, ExecutionError};
use crate::export::export_python;
use crate::graph::Graph;
use crate::library::NativeLibrary;
use crate::loader::{ModuleCache, NodeRegistry, PackLoader};
use crate::node::NodeId;
use crate::scheduler::{error_chain, RunOutcome, Scheduler};
use crate::socket::SocketId;
use crate::socket_tree::Point;
use crate::stdout;
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Receives what a host would show the user
pub trait HostNotifier: Send {
    /// Informational dialog
    fn info(&self, message: &str);
    /// Error dialog
    fn error(&self, message: &str);
    /// Status bar message
    fn status(&self, message: &str);
}

/// Notifier that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl HostNotifier for TracingNotifier {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn status(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// A recorded notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Informational dialog
    Info(String),
    /// Error dialog
    Error(String),
    /// Status bar message
    Status(String),
}

/// Notifier that keeps every notification; clones share the record
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
}

impl HostNotifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.notifications.lock().push(Notification::Info(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.notifications.lock().push(Notification::Error(message.to_string()));
    }

    fn status(&self, message: &str) {
        self.notifications.lock().push(Notification::Status(message.to_string()));
    }
}

/// A loaded session
pub struct Engine {
    library: NativeLibrary,
    config: EngineConfig,
    registry: NodeRegistry,
    cache: ModuleCache,
    graph: Graph,
    document: Option<GraphDocument>,
    document_path: Option<PathBuf>,
    notifier: Box<dyn HostNotifier>,
}

impl Engine {
    /// Create an engine with no document loaded
    pub fn new(library: NativeLibrary, config: EngineConfig) -> Self {
        Self {
            library,
            config,
            registry: NodeRegistry::default(),
            cache: ModuleCache::new(),
            graph: Graph::new(),
            document: None,
            document_path: None,
            notifier: Box::new(TracingNotifier),
        }
    }

    /// Replace the notifier
    pub fn with_notifier(mut self, notifier: impl HostNotifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    /// Native library
    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }

    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loader registries
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Live graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Live graph, for node-level edits
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Path of the loaded document
    pub fn document_path(&self) -> Option<&Path> {
        self.document_path.as_deref()
    }

    fn report<T, E: Into<EngineError>>(&self, result: Result<T, E>) -> Result<T, EngineError> {
        result.map_err(|error| {
            let error = error.into();
            self.notifier.error(&error.to_string());
            error
        })
    }

    // ----- Documents and packs -----

    /// Load a document file, its node packs and its graph
    pub fn load_document(&mut self, path: &Path) -> Result<(), EngineError> {
        let document = self.report(GraphDocument::load(path))?;
        self.load(document, Some(path.to_path_buf()))
    }

    /// Load an in-memory document; relative pack paths are taken from the
    /// working directory
    pub fn load_document_value(&mut self, document: GraphDocument) -> Result<(), EngineError> {
        self.load(document, None)
    }

    fn load(&mut self, document: GraphDocument, path: Option<PathBuf>) -> Result<(), EngineError> {
        let base = path.as_deref().and_then(Path::parent);
        let registry = self.load_packs(&document, base)?;
        let graph = self.report(document.resolve(&self.library, &registry))?;
        tracing::info!("Graph ready with {} node(s)", graph.node_count());
        self.registry = registry;
        self.graph = graph;
        self.document = Some(document);
        self.document_path = path;
        Ok(())
    }

    fn load_packs(&mut self, document: &GraphDocument, base: Option<&Path>) -> Result<NodeRegistry, EngineError> {
        let result = PackLoader::new(&self.library, &mut self.cache)
            .with_palette_size(self.config.category_palette_size)
            .load(&document.pack_paths(base), &document.installed_node_packs);
        self.report(result)
    }

    /// Reload every node pack and swap the new definitions into the live
    /// graph. Edges to parameters that no longer exist are dropped.
    pub fn reload_packs(&mut self) -> Result<(), EngineError> {
        let Some(document) = self.document.clone() else {
            return self.report(Err(EngineError::NoDocument));
        };
        for pack in &self.registry.known_packs {
            let evicted = self.cache.evict_pack(pack);
            tracing::debug!("Evicted {} cached module(s) of pack '{}'", evicted, pack);
        }
        let base = self.document_path.as_deref().and_then(Path::parent).map(Path::to_path_buf);
        let registry = self.load_packs(&document, base.as_deref())?;

        let mut missing = Vec::new();
        let mut resolved = Vec::new();
        for node in self.graph.nodes() {
            match resolve_definition(node.record(), &self.library, &registry) {
                Ok(Some(definition)) => resolved.push((node.id(), definition)),
                Ok(None) => {}
                Err(DocumentError::MissingNodeScripts(mut ids)) => missing.append(&mut ids),
                Err(error) => return self.report(Err(error)),
            }
        }
        if !missing.is_empty() {
            return self.report(Err(DocumentError::MissingNodeScripts(missing)));
        }
        for (id, definition) in resolved {
            if let Some(node) = self.graph.node_mut(id) {
                node.set_definition(definition);
            }
        }
        self.graph.prune_stale_edges();
        self.registry = registry;
        tracing::info!("Reloaded {} node script(s)", self.registry.node_def_map.len());
        Ok(())
    }

    /// Regenerate the persisted document from the live graph
    pub fn to_document(&self) -> GraphDocument {
        let (node_packs, installed) = self
            .document
            .as_ref()
            .map(|d| (d.node_packs.clone(), d.installed_node_packs.clone()))
            .unwrap_or_default();
        GraphDocument::from_graph(&self.graph, node_packs, installed)
    }

    /// Save the live graph
    pub fn save_document(&self, path: &Path) -> Result<(), EngineError> {
        self.report(self.to_document().save(path))
    }

    // ----- Execution -----

    fn scheduler(&self) -> Scheduler {
        Scheduler::new().with_exec_time_tracking(self.config.track_exec_time)
    }

    fn finish_run(&self, result: Result<RunOutcome, ExecutionError>) -> Result<RunOutcome, EngineError> {
        match result {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Completed(report) => self.notifier.status(&report.status_message()),
                    other => {
                        if let Some(message) = other.info_message() {
                            self.notifier.info(message);
                        }
                    }
                }
                Ok(outcome)
            }
            Err(error) => {
                if error.is_user_facing() {
                    self.notifier.error(&error.to_string());
                } else {
                    self.notifier.error(&format!(
                        "{}. Check the user log for details.",
                        error_chain(&error).lines().next().unwrap_or_default()
                    ));
                }
                Err(error.into())
            }
        }
    }

    /// Execute the requested nodes, or all of them
    pub fn execute_graph(&mut self, requested: Option<&IndexSet<NodeId>>) -> Result<RunOutcome, EngineError> {
        let result = self.scheduler().execute_graph(&mut self.graph, requested);
        self.finish_run(result)
    }

    /// Execute a node after every node feeding it
    pub fn execute_node_after_upstream_ones(&mut self, node_id: NodeId) -> Result<RunOutcome, EngineError> {
        let result = self
            .scheduler()
            .execute_node_after_upstream_ones(&mut self.graph, node_id);
        self.finish_run(result)
    }

    /// Execute with the engine stdout captured, returning the captured text
    /// alongside the result. The previous sink is restored on every path.
    pub fn execute_with_custom_stdout(
        &mut self,
        requested: Option<&IndexSet<NodeId>>,
    ) -> (Result<RunOutcome, EngineError>, String) {
        let guard = stdout::redirect();
        let result = self.execute_graph(requested);
        (result, guard.finish())
    }

    // ----- Export -----

    /// Export the live graph as a Python script
    pub fn export_python(&self) -> Result<String, EngineError> {
        let stem = self
            .document_path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "graph".to_string());
        self.report(export_python(&self.graph, &stem))
    }

    // ----- Edge edits -----

    /// Check an edge without creating it, returning `(parent, child)`
    pub fn validate_edge(&self, a: &SocketId, b: &SocketId) -> Result<(SocketId, SocketId), EngineError> {
        self.report::<_, EdgeError>(self.graph.validate_edge(a, b))
    }

    /// Connect two sockets
    pub fn add_edge(&mut self, a: &SocketId, b: &SocketId) -> Result<(), EngineError> {
        let result = self.graph.add_edge(a, b);
        self.report(result)
    }

    /// Disconnect `child` from `parent`
    pub fn remove_edge(&mut self, parent: &SocketId, child: &SocketId) -> Result<(), EngineError> {
        let result = self.graph.remove_edge(parent, child);
        self.report(result)
    }

    /// Sever edges crossing the segment `p1`-`p2`
    pub fn cut_crossing_segments(
        &mut self,
        p1: Point,
        p2: Point,
        socket_centre: impl Fn(&SocketId) -> Option<Point>,
    ) -> Vec<(SocketId, SocketId)> {
        self.graph.cut_crossing_segments(p1, p2, socket_centre)
    }

    /// Sever every edge touching a node
    pub fn sever_all_connections(&mut self, node_id: NodeId) {
        self.graph.sever_all_connections(node_id);
    }

    /// Sever every edge out of an output or proxy socket
    pub fn sever_children(&mut self, parent: &SocketId) -> Vec<SocketId> {
        self.graph.sever_children(parent)
    }

    /// Sever the edge into a socket
    pub fn sever_parent(&mut self, child: &SocketId) -> Option<SocketId> {
        self.graph.sever_parent(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeRecord, WidgetRecord};
    use tempfile::TempDir;

    fn document() -> GraphDocument {
        let mut document = GraphDocument::default();
        let mut data = NodeRecord::proxy(1);
        data.widget = Some(WidgetRecord::new(-4));
        document.nodes.insert("1".into(), data);
        let mut abs = NodeRecord::proxy(2);
        abs.builtin_id = Some("print".into());
        document.nodes.insert("2".into(), abs);
        document
    }

    #[test]
    fn test_notifications_and_stdout_capture() {
        let notifier = RecordingNotifier::new();
        let mut engine =
            Engine::new(NativeLibrary::standard(), EngineConfig::default()).with_notifier(notifier.clone());
        engine.load_document_value(document()).unwrap();
        engine.graph_mut().node_mut(2).unwrap().add_subparameter("values").unwrap();
        engine
            .add_edge(&SocketId::proxy(1), &SocketId::subparam(2, "values", 0))
            .unwrap();

        let _lock = stdout::TEST_LOCK.lock();
        let (result, captured) = engine.execute_with_custom_stdout(None);
        assert!(matches!(result, Ok(RunOutcome::Completed(_))));
        assert_eq!(captured, "-4\n");
        assert!(matches!(notifier.notifications().last(), Some(Notification::Status(_))));
    }

    #[test]
    fn test_edge_errors_are_reported_and_returned() {
        let notifier = RecordingNotifier::new();
        let mut engine =
            Engine::new(NativeLibrary::standard(), EngineConfig::default()).with_notifier(notifier.clone());
        engine.load_document_value(document()).unwrap();
        let error = engine
            .add_edge(&SocketId::proxy(1), &SocketId::input(2, "nope"))
            .unwrap_err();
        assert!(matches!(error, EngineError::Edge(EdgeError::UnknownSocket(_))));
        assert!(matches!(notifier.notifications().as_slice(), [Notification::Error(_)]));
    }

    #[test]
    fn test_reload_without_document() {
        let mut engine = Engine::new(NativeLibrary::standard(), EngineConfig::default())
            .with_notifier(RecordingNotifier::new());
        assert!(matches!(engine.reload_packs(), Err(EngineError::NoDocument)));
        assert_eq!(
            engine.execute_graph(None).unwrap(),
            RunOutcome::NoNodes
        );
    }

    #[test]
    fn test_save_and_export_use_document_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sum-up.json");
        document().save(&path).unwrap();

        let mut engine = Engine::new(NativeLibrary::standard(), EngineConfig::default())
            .with_notifier(RecordingNotifier::new());
        engine.load_document(&path).unwrap();
        assert_eq!(engine.document_path(), Some(path.as_path()));
        let script = engine.export_python().unwrap();
        assert!(script.contains("def sum_up():"));
        assert_eq!(engine.to_document(), document());
    }
}
