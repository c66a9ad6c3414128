// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nodes and their execution contract.
//!
//! A node is either a proxy (a single relay socket, optionally holding a
//! literal widget) or wraps a [`NodeDefinition`]. Every node goes through the
//! same steps during a run: classify, setup, receive inputs, marshal.

use crate::definition::{NodeDefinition, ScriptId};
use crate::error::ExecutionError;
use crate::marshal::{ArgumentMap, ArgumentValue};
use crate::signature::{ParameterKind, Signature};
use crate::socket::SocketId;
use crate::socket_tree::SocketTree;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier for a node within a document
pub type NodeId = u64;

/// `mode` value putting a node in callable mode
pub const CALLABLE_MODE: &str = "callable";

/// Name of the output socket of a callable-mode node
pub const CALLABLE_OUTPUT_NAME: &str = "callable";

fn is_false(value: &bool) -> bool {
    !*value
}

fn stash_key(socket: &SocketId) -> Option<String> {
    match socket {
        SocketId::Input {
            param,
            subparam: None,
            ..
        } => Some(param.clone()),
        SocketId::Input {
            param,
            subparam: Some(index),
            ..
        } => Some(format!("{param}/{index}")),
        SocketId::Proxy { .. } => Some(String::new()),
        SocketId::Output { .. } => None,
    }
}

/// An embedded widget holding a literal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetRecord {
    /// User-edited value
    #[serde(default)]
    pub value: Value,
    /// The value stands for the callable's own default and is not passed
    #[serde(default, skip_serializing_if = "is_false")]
    pub default_holder: bool,
    /// Widget used to edit the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_name: Option<String>,
}

impl WidgetRecord {
    /// Widget holding `value`
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Sentinel widget deferring to the callable's default
    pub fn default_holder() -> Self {
        Self {
            default_holder: true,
            ..Self::default()
        }
    }
}

/// Persisted node record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id
    pub id: NodeId,

    // Kind tags; at most one is set, none means a proxy node
    /// Script from a node pack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<ScriptId>,
    /// Built-in operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Built-in function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin_id: Option<String>,
    /// Standard library callable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stlib_id: Option<String>,
    /// Third-party callable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thirdlib_id: Option<String>,
    /// Snippet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_id: Option<String>,
    /// General viewer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genviewer_id: Option<String>,

    /// `expanded_signature`, `callable` or anything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Excluded from execution
    #[serde(default, skip_serializing_if = "is_false")]
    pub commented_out: bool,
    /// User-given title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `[x, y, width, height]` on the canvas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<[f64; 4]>,

    /// Literal of a proxy node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetRecord>,
    /// Widgets of regular parameters
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub param_widget_value_map: IndexMap<String, WidgetRecord>,
    /// Subparameter indices of variable-kind parameters
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub subparam_map: IndexMap<String, Vec<usize>>,
    /// Keyword names of var-keyword subparameters
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub subparam_keyword_map: IndexMap<String, IndexMap<usize, String>>,
    /// Subparameters whose values are splatted
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub subparam_unpacking_map: IndexMap<String, Vec<usize>>,
    /// Widgets of subparameters
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub subparam_widget_map: IndexMap<String, IndexMap<usize, WidgetRecord>>,
    /// Widgets put aside while their socket is connected, keyed by
    /// `param`, `param/index` or `""` for the proxy widget
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub stashed_widget_map: IndexMap<String, WidgetRecord>,
}

impl NodeRecord {
    /// Proxy record
    pub fn proxy(id: NodeId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Set kind tags as `(tag, id)` pairs
    pub fn kind_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = Vec::new();
        if let Some(id) = &self.script_id {
            tags.push(("script_id", id.to_string()));
        }
        let simple = [
            ("operation_id", &self.operation_id),
            ("builtin_id", &self.builtin_id),
            ("stlib_id", &self.stlib_id),
            ("thirdlib_id", &self.thirdlib_id),
            ("capsule_id", &self.capsule_id),
            ("genviewer_id", &self.genviewer_id),
        ];
        for (tag, id) in simple {
            if let Some(id) = id {
                tags.push((tag, id.clone()));
            }
        }
        tags
    }
}

/// How the scheduler treats a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    /// Proxy with a parent: transparent relay
    Redirect,
    /// Proxy without a parent: literal source
    Data,
    /// Propagates its callable instead of being invoked
    CallableMode,
    /// Invoked in topological order
    Schedulable,
}

/// Execution state within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecState {
    /// Not part of a run
    #[default]
    Idle,
    /// Set up and waiting for inputs
    Ready,
    /// Callable returned
    Executed,
}

/// A node instance
#[derive(Debug, Clone)]
pub struct Node {
    record: NodeRecord,
    definition: Option<Arc<NodeDefinition>>,

    // Per-run state, owned by the scheduler
    argument_map: ArgumentMap,
    pending_param_names: Vec<String>,
    expects_input_map: IndexMap<String, bool>,
    connected_inputs: HashSet<SocketId>,
    state: ExecState,
    pub(crate) input_source_ids: HashSet<NodeId>,
    exec_time: Option<Duration>,

    in_graph_visual: Option<Value>,
    loop_data: Option<Value>,
}

impl Node {
    /// Create a node; proxies have no definition
    pub fn new(record: NodeRecord, definition: Option<Arc<NodeDefinition>>) -> Self {
        let mut node = Self {
            record,
            definition,
            argument_map: ArgumentMap::new(),
            pending_param_names: Vec::new(),
            expects_input_map: IndexMap::new(),
            connected_inputs: HashSet::new(),
            state: ExecState::Idle,
            input_source_ids: HashSet::new(),
            exec_time: None,
            in_graph_visual: None,
            loop_data: None,
        };
        node.clear_argument_map();
        node
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.record.id
    }

    /// Persisted record
    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    pub(crate) fn record_mut(&mut self) -> &mut NodeRecord {
        &mut self.record
    }

    /// Wrapped definition, `None` for proxies
    pub fn definition(&self) -> Option<&Arc<NodeDefinition>> {
        self.definition.as_ref()
    }

    /// Swap in a reloaded definition, dropping widgets of parameters it no
    /// longer declares
    pub(crate) fn set_definition(&mut self, definition: Arc<NodeDefinition>) {
        let known: HashSet<&str> = definition
            .signature
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        let id = self.record.id;
        self.record.param_widget_value_map.retain(|name, _| {
            let keep = known.contains(name.as_str());
            if !keep {
                tracing::warn!("Node {}: dropping widget of unknown parameter '{}'", id, name);
            }
            keep
        });
        self.record.subparam_map.retain(|name, _| known.contains(name.as_str()));
        self.record.subparam_keyword_map.retain(|name, _| known.contains(name.as_str()));
        self.record.subparam_unpacking_map.retain(|name, _| known.contains(name.as_str()));
        self.record.subparam_widget_map.retain(|name, _| known.contains(name.as_str()));
        self.record.stashed_widget_map.retain(|key, _| {
            key.is_empty() || known.contains(key.split('/').next().unwrap_or(key))
        });
        self.definition = Some(definition);
        self.clear_argument_map();
    }

    /// Signature driving argument layout
    pub fn signature(&self) -> Option<&Signature> {
        self.definition.as_ref().map(|d| &d.signature)
    }

    /// Display title
    pub fn title(&self) -> String {
        if let Some(label) = &self.record.label {
            return label.clone();
        }
        match &self.definition {
            Some(definition) => definition.title(),
            None => "proxy".to_string(),
        }
    }

    /// Whether this is a proxy node
    pub fn is_proxy(&self) -> bool {
        self.definition.is_none()
    }

    /// Whether the node is excluded from execution
    pub fn is_commented_out(&self) -> bool {
        self.record.commented_out
    }

    /// Flag the node as commented out or not
    pub fn set_commented_out(&mut self, commented_out: bool) {
        self.record.commented_out = commented_out;
    }

    /// Whether the node propagates its callable instead of being invoked
    pub fn is_callable_mode(&self) -> bool {
        self.definition.is_some() && self.record.mode.as_deref() == Some(CALLABLE_MODE)
    }

    /// Literal held by a proxy node
    pub fn widget_value(&self) -> Option<&Value> {
        self.record.widget.as_ref().map(|w| &w.value)
    }

    /// Accumulated arguments
    pub fn argument_map(&self) -> &ArgumentMap {
        &self.argument_map
    }

    /// Execution state
    pub fn state(&self) -> ExecState {
        self.state
    }

    /// Duration of the last invocation
    pub fn exec_time(&self) -> Option<Duration> {
        self.exec_time
    }

    /// Visual produced by a backdoor or side-visual hook
    pub fn in_graph_visual(&self) -> Option<&Value> {
        self.in_graph_visual.as_ref()
    }

    /// Loop data produced by a backdoor or side-visual hook
    pub fn loop_data(&self) -> Option<&Value> {
        self.loop_data.as_ref()
    }

    /// Parameters still waiting for input in the current run
    pub fn pending_param_names(&self) -> &[String] {
        &self.pending_param_names
    }

    // ----- Sockets -----

    /// Input sockets: one per regular parameter, one per subparameter
    pub fn input_sockets(&self) -> Vec<SocketId> {
        let id = self.id();
        match &self.definition {
            None => vec![SocketId::proxy(id)],
            Some(_) if self.is_callable_mode() => Vec::new(),
            Some(definition) => {
                let mut sockets = Vec::new();
                for param in &definition.signature.parameters {
                    if param.kind.is_variable() {
                        for index in self.subparameters(&param.name) {
                            sockets.push(SocketId::subparam(id, &param.name, index));
                        }
                    } else {
                        sockets.push(SocketId::input(id, &param.name));
                    }
                }
                sockets
            }
        }
    }

    /// Output sockets
    pub fn output_sockets(&self) -> Vec<SocketId> {
        let id = self.id();
        match &self.definition {
            None => vec![SocketId::proxy(id)],
            Some(_) if self.is_callable_mode() => vec![SocketId::output(id, CALLABLE_OUTPUT_NAME)],
            Some(definition) => definition
                .signature
                .output_names()
                .into_iter()
                .map(|name| SocketId::output(id, name))
                .collect(),
        }
    }

    /// Whether `socket` exists on this node
    pub fn has_socket(&self, socket: &SocketId) -> bool {
        socket.node_id() == self.id()
            && (self.input_sockets().contains(socket) || self.output_sockets().contains(socket))
    }

    /// Subparameter indices of a variable-kind parameter
    pub fn subparameters(&self, param: &str) -> Vec<usize> {
        self.record.subparam_map.get(param).cloned().unwrap_or_default()
    }

    /// Append a subparameter to a variable-kind parameter, returning its index
    pub fn add_subparameter(&mut self, param: &str) -> Option<usize> {
        let kind = self.signature()?.parameter(param)?.kind;
        if !kind.is_variable() {
            return None;
        }
        let indices = self.record.subparam_map.entry(param.to_string()).or_default();
        let index = indices.iter().max().map_or(0, |max| max + 1);
        indices.push(index);
        Some(index)
    }

    /// Whether a subparameter is splatted
    pub fn is_unpacked(&self, param: &str, index: usize) -> bool {
        self.record
            .subparam_unpacking_map
            .get(param)
            .is_some_and(|indices| indices.contains(&index))
    }

    /// Keyword name of a var-keyword subparameter
    pub fn subparam_keyword(&self, param: &str, index: usize) -> Option<&str> {
        self.record
            .subparam_keyword_map
            .get(param)
            .and_then(|names| names.get(&index))
            .map(String::as_str)
    }

    /// Widget of an input socket, if any
    pub fn input_widget(&self, socket: &SocketId) -> Option<&WidgetRecord> {
        match socket {
            SocketId::Input {
                param,
                subparam: None,
                ..
            } => self.record.param_widget_value_map.get(param),
            SocketId::Input {
                param,
                subparam: Some(index),
                ..
            } => self
                .record
                .subparam_widget_map
                .get(param)
                .and_then(|widgets| widgets.get(index)),
            SocketId::Proxy { .. } => self.record.widget.as_ref(),
            SocketId::Output { .. } => None,
        }
    }

    /// Remove the widget of a socket that just gained a parent
    pub(crate) fn stash_widget(&mut self, socket: &SocketId) {
        let widget = match socket {
            SocketId::Input {
                param,
                subparam: None,
                ..
            } => self.record.param_widget_value_map.shift_remove(param),
            SocketId::Input {
                param,
                subparam: Some(index),
                ..
            } => self
                .record
                .subparam_widget_map
                .get_mut(param)
                .and_then(|widgets| widgets.shift_remove(index)),
            SocketId::Proxy { .. } => self.record.widget.take(),
            SocketId::Output { .. } => None,
        };
        if let (Some(key), Some(widget)) = (stash_key(socket), widget) {
            self.record.stashed_widget_map.insert(key, widget);
        }
    }

    /// Bookkeeping after a socket lost its parent: reinstate a stashed widget,
    /// or drop a widgetless subparameter
    pub(crate) fn on_input_disconnected(&mut self, socket: &SocketId) {
        let stashed = stash_key(socket)
            .and_then(|key| self.record.stashed_widget_map.shift_remove(&key));
        match socket {
            SocketId::Input {
                param,
                subparam: None,
                ..
            } => {
                if let Some(widget) = stashed {
                    self.record.param_widget_value_map.insert(param.clone(), widget);
                }
            }
            SocketId::Input {
                param,
                subparam: Some(index),
                ..
            } => match stashed {
                Some(widget) => {
                    self.record
                        .subparam_widget_map
                        .entry(param.clone())
                        .or_default()
                        .insert(*index, widget);
                }
                None => self.remove_subparameter(param, *index),
            },
            SocketId::Proxy { .. } => {
                if stashed.is_some() {
                    self.record.widget = stashed;
                }
            }
            SocketId::Output { .. } => {}
        }
    }

    fn remove_subparameter(&mut self, param: &str, index: usize) {
        let record = &mut self.record;
        if let Some(indices) = record.subparam_map.get_mut(param) {
            indices.retain(|i| *i != index);
        }
        if let Some(indices) = record.subparam_unpacking_map.get_mut(param) {
            indices.retain(|i| *i != index);
        }
        if let Some(names) = record.subparam_keyword_map.get_mut(param) {
            names.shift_remove(&index);
        }
        if let Some(widgets) = record.subparam_widget_map.get_mut(param) {
            widgets.shift_remove(&index);
        }
    }

    /// Move every per-parameter entry from `old` to `new`
    pub(crate) fn rename_parameter(&mut self, old: &str, new: &str) {
        fn rename<V>(map: &mut IndexMap<String, V>, old: &str, new: &str) {
            if let Some(value) = map.shift_remove(old) {
                map.insert(new.to_string(), value);
            }
        }
        let record = &mut self.record;
        rename(&mut record.param_widget_value_map, old, new);
        rename(&mut record.subparam_map, old, new);
        rename(&mut record.subparam_keyword_map, old, new);
        rename(&mut record.subparam_unpacking_map, old, new);
        rename(&mut record.subparam_widget_map, old, new);
        let prefix = format!("{old}/");
        record.stashed_widget_map = std::mem::take(&mut record.stashed_widget_map)
            .into_iter()
            .map(|(key, widget)| {
                let key = match key.strip_prefix(&prefix) {
                    Some(index) => format!("{new}/{index}"),
                    None if key == old => new.to_string(),
                    None => key,
                };
                (key, widget)
            })
            .collect();
        rename(&mut self.argument_map, old, new);
    }

    pub(crate) fn set_id(&mut self, new_id: NodeId) {
        self.record.id = new_id;
    }

    // ----- Execution contract -----

    /// Classify for the scheduler
    pub fn classify_me(&self, tree: &SocketTree) -> NodeClass {
        if self.is_proxy() {
            if tree.parent_of(&SocketId::proxy(self.id())).is_some() {
                NodeClass::Redirect
            } else {
                NodeClass::Data
            }
        } else if self.is_callable_mode() {
            NodeClass::CallableMode
        } else {
            NodeClass::Schedulable
        }
    }

    /// Reset per-run state and record which parameters have incoming edges
    pub fn perform_execution_setup(&mut self, tree: &SocketTree) {
        self.clear_argument_map();
        self.expects_input_map.clear();
        self.connected_inputs.clear();
        self.pending_param_names.clear();
        self.input_source_ids.clear();

        let inputs = self.input_sockets();
        if let Some(signature) = self.signature().cloned() {
            for param in &signature.parameters {
                self.pending_param_names.push(param.name.clone());
                self.expects_input_map.insert(param.name.clone(), false);
            }
        }
        for socket in inputs {
            if tree.parent_of(&socket).is_some() {
                if let SocketId::Input { param, .. } = &socket {
                    self.expects_input_map.insert(param.clone(), true);
                }
                self.connected_inputs.insert(socket);
            }
        }
        self.state = ExecState::Ready;
    }

    /// Pick each parameter's source: edge, then widget, then the callable's
    /// default
    pub fn check_and_setup_parameters(&mut self) -> Result<(), ExecutionError> {
        let Some(definition) = self.definition.clone() else {
            return Ok(());
        };
        let id = self.id();
        let mut lacking = Vec::new();

        for param in &definition.signature.parameters {
            if param.kind.is_variable() {
                let mut values = BTreeMap::new();
                for index in self.subparameters(&param.name) {
                    let needs_keyword = param.kind == ParameterKind::VarKeyword
                        && !self.is_unpacked(&param.name, index);
                    if needs_keyword && self.subparam_keyword(&param.name, index).is_none() {
                        lacking.push(format!("{}[{index}]", param.name));
                        continue;
                    }
                    let socket = SocketId::subparam(id, &param.name, index);
                    if self.connected_inputs.contains(&socket) {
                        continue;
                    }
                    match self.input_widget(&socket) {
                        Some(widget) => {
                            values.insert(index, widget.value.clone());
                        }
                        None => lacking.push(format!("{}[{index}]", param.name)),
                    }
                }
                self.argument_map
                    .insert(param.name.clone(), ArgumentValue::Subparameters(values));
                continue;
            }

            if self.expects_input_map.get(&param.name) == Some(&true) {
                continue;
            }
            self.pending_param_names.retain(|p| p != &param.name);
            match self.record.param_widget_value_map.get(&param.name) {
                Some(widget) if !widget.default_holder => {
                    self.argument_map
                        .insert(param.name.clone(), ArgumentValue::Single(widget.value.clone()));
                }
                _ if param.default.is_some() => {}
                _ => lacking.push(param.name.clone()),
            }
        }

        if lacking.is_empty() {
            Ok(())
        } else {
            Err(ExecutionError::LackOfInput {
                node_id: id,
                node_title: self.title(),
                params: lacking,
            })
        }
    }

    /// Store a value arriving at one of this node's input sockets
    pub fn receive_input(&mut self, value: Value, socket: &SocketId) {
        let SocketId::Input {
            param, subparam, ..
        } = socket
        else {
            return;
        };
        match subparam {
            None => {
                self.argument_map.insert(param.clone(), ArgumentValue::Single(value));
            }
            Some(index) => {
                let entry = self
                    .argument_map
                    .entry(param.clone())
                    .or_insert_with(|| ArgumentValue::Subparameters(BTreeMap::new()));
                match entry {
                    ArgumentValue::Subparameters(values) => {
                        values.insert(*index, value);
                    }
                    ArgumentValue::Single(_) => {
                        *entry = ArgumentValue::Subparameters(BTreeMap::from([(*index, value)]));
                    }
                }
            }
        }
        self.pending_param_names.retain(|p| p != param);
    }

    /// Collapse the argument map into one value per parameter, assembling
    /// variable-kind subparameters. Empty variable-kind parameters are left
    /// out.
    pub fn resolved_arguments(&self) -> Result<IndexMap<String, Value>, ExecutionError> {
        let mut resolved = IndexMap::new();
        let Some(signature) = self.signature() else {
            return Ok(resolved);
        };
        for param in &signature.parameters {
            match (param.kind, self.argument_map.get(&param.name)) {
                (_, None) => {}
                (_, Some(ArgumentValue::Single(value))) => {
                    resolved.insert(param.name.clone(), value.clone());
                }
                (ParameterKind::VarPositional, Some(ArgumentValue::Subparameters(values))) => {
                    if values.is_empty() {
                        continue;
                    }
                    let mut items = Vec::new();
                    for (index, value) in values {
                        if !self.is_unpacked(&param.name, *index) {
                            items.push(value.clone());
                            continue;
                        }
                        let unpacked = value.iter_items().ok_or_else(|| {
                            ExecutionError::PositionalSubparameterUnpacking {
                                node_id: self.id(),
                                node_title: self.title(),
                                param: param.name.clone(),
                                subparam_index: *index,
                                type_name: value.type_name().to_string(),
                            }
                        })?;
                        items.extend(unpacked);
                    }
                    resolved.insert(param.name.clone(), Value::Tuple(items));
                }
                (ParameterKind::VarKeyword, Some(ArgumentValue::Subparameters(values))) => {
                    if values.is_empty() {
                        continue;
                    }
                    let mut entries = IndexMap::new();
                    for (index, value) in values {
                        if self.is_unpacked(&param.name, *index) {
                            let Value::Map(map) = value else {
                                return Err(ExecutionError::KeywordSubparameterUnpacking {
                                    node_id: self.id(),
                                    node_title: self.title(),
                                    param: param.name.clone(),
                                    subparam_index: *index,
                                    type_name: value.type_name().to_string(),
                                });
                            };
                            entries.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                        } else if let Some(keyword) = self.subparam_keyword(&param.name, *index) {
                            entries.insert(keyword.to_string(), value.clone());
                        }
                    }
                    resolved.insert(param.name.clone(), Value::Map(entries));
                }
                (_, Some(ArgumentValue::Subparameters(_))) => {}
            }
        }
        Ok(resolved)
    }

    /// Reset preview and loop state before invocation
    pub fn perform_pre_execution_setups(&mut self) {
        self.in_graph_visual = None;
        self.loop_data = None;
    }

    /// Store visuals routed from a backdoor or side-visual hook
    pub fn set_visuals(&mut self, in_graph_visual: Option<Value>, loop_data: Option<Value>) {
        self.in_graph_visual = in_graph_visual;
        self.loop_data = loop_data;
    }

    /// Record a completed invocation
    pub fn mark_executed(&mut self, exec_time: Duration) {
        self.exec_time = Some(exec_time);
        self.state = ExecState::Executed;
    }

    /// Empty the argument map, keeping empty entries for variable-kind
    /// parameters
    pub fn clear_argument_map(&mut self) {
        self.argument_map.clear();
        let variable: Vec<String> = self
            .signature()
            .map(|s| s.variable_parameters().map(|p| p.name.clone()).collect())
            .unwrap_or_default();
        for name in variable {
            self.argument_map
                .insert(name, ArgumentValue::Subparameters(BTreeMap::new()));
        }
    }

    /// Return to idle, dropping everything a failed run left behind
    pub fn reset_state(&mut self) {
        self.clear_argument_map();
        self.input_source_ids.clear();
        self.state = ExecState::Idle;
    }
}
