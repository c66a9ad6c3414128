// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes, the socket forest and text blocks.
//!
//! All structural edits go through [`Graph`] so the forest, the node
//! records and the widget bookkeeping stay consistent.

use crate::error::{CycleError, DocumentError, EdgeError};
use crate::node::{Node, NodeId};
use crate::socket::{SocketId, SocketKind};
use crate::socket_tree::{segments_intersect, Point, SocketTree};
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Free text placed on the canvas
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    /// Text contents
    pub text: String,
    /// `[x, y, width, height]` on the canvas
    #[serde(default)]
    pub rect: [f64; 4],
}

impl TextBlock {
    /// Whether the block covers `point`
    pub fn contains(&self, point: Point) -> bool {
        let [x, y, w, h] = self.rect;
        point.0 >= x && point.0 <= x + w && point.1 >= y && point.1 <= y + h
    }
}

/// A node graph
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: IndexMap<NodeId, Node>,
    tree: SocketTree,
    text_blocks: Vec<TextBlock>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a graph from loaded parts, checking that every edge joins
    /// existing sockets of the right roles and that no cycle exists
    pub fn from_parts(
        nodes: Vec<Node>,
        tree: SocketTree,
        text_blocks: Vec<TextBlock>,
    ) -> Result<Self, DocumentError> {
        let mut graph = Self {
            nodes: IndexMap::new(),
            tree,
            text_blocks,
        };
        for node in nodes {
            let id = node.id();
            if graph.nodes.insert(id, node).is_some() {
                return Err(DocumentError::DuplicateNodeId(id));
            }
        }

        let edges: Vec<(SocketId, SocketId)> = graph
            .tree
            .edges()
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        for (parent, child) in &edges {
            for socket in [parent, child] {
                let exists = graph
                    .nodes
                    .get(&socket.node_id())
                    .is_some_and(|node| node.has_socket(socket));
                if !exists {
                    return Err(DocumentError::UnknownSocket(socket.clone()));
                }
            }
            if !parent.can_be_parent() || !child.can_be_child() {
                return Err(DocumentError::InvalidSocket(format!("{parent} -> {child}")));
            }
            if parent.node_id() == child.node_id() {
                return Err(DocumentError::Cycle(CycleError));
            }
        }
        let all: IndexSet<NodeId> = graph.nodes.keys().copied().collect();
        generations(graph.input_sources(&all))?;
        Ok(graph)
    }

    // ----- Nodes -----

    /// Add a node to the graph, replacing any node with the same id
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and its connections
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        self.sever_all_connections(node_id);
        self.nodes.shift_remove(&node_id)
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// A node together with the socket forest, for setups that read edges
    /// while mutating the node
    pub(crate) fn node_and_tree_mut(&mut self, node_id: NodeId) -> Option<(&mut Node, &SocketTree)> {
        let node = self.nodes.get_mut(&node_id)?;
        Some((node, &self.tree))
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Socket forest
    pub fn tree(&self) -> &SocketTree {
        &self.tree
    }

    /// Text blocks
    pub fn text_blocks(&self) -> &[TextBlock] {
        &self.text_blocks
    }

    /// Add a text block
    pub fn add_text_block(&mut self, block: TextBlock) {
        self.text_blocks.push(block);
    }

    // ----- Edges -----

    fn ensure_socket(&self, socket: &SocketId) -> Result<(), EdgeError> {
        let exists = self
            .nodes
            .get(&socket.node_id())
            .is_some_and(|node| node.has_socket(socket));
        if exists {
            Ok(())
        } else {
            Err(EdgeError::UnknownSocket(socket.clone()))
        }
    }

    /// Check that `a` and `b` may be connected, returning them as
    /// `(parent, child)`
    pub fn validate_edge(
        &self,
        a: &SocketId,
        b: &SocketId,
    ) -> Result<(SocketId, SocketId), EdgeError> {
        self.ensure_socket(a)?;
        self.ensure_socket(b)?;

        let (parent, child) = match (a.kind(), b.kind()) {
            (SocketKind::Input, SocketKind::Input) => {
                return Err(EdgeError::BothInputs(a.clone(), b.clone()));
            }
            (SocketKind::Output, SocketKind::Output) => {
                return Err(EdgeError::BothOutputs(a.clone(), b.clone()));
            }
            (SocketKind::Input, _) | (SocketKind::Proxy, SocketKind::Output) => (b, a),
            _ => (a, b),
        };

        if self.tree.contains_edge(parent, child) {
            return Err(EdgeError::AlreadyConnected {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        if parent.node_id() == child.node_id() {
            return Err(EdgeError::SameNode {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        if self.upstream_nodes(parent.node_id()).contains(&child.node_id()) {
            return Err(EdgeError::WouldCreateCycle {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        Ok((parent.clone(), child.clone()))
    }

    /// Connect two sockets. An existing parent of the child is replaced.
    pub fn add_edge(&mut self, a: &SocketId, b: &SocketId) -> Result<(), EdgeError> {
        let (parent, child) = self.validate_edge(a, b)?;
        let child_node = child.node_id();
        let parent_node = parent.node_id();

        self.tree.insert(parent, child.clone());
        if let Some(node) = self.nodes.get_mut(&child_node) {
            node.stash_widget(&child);
        }

        let commented = [parent_node, child_node]
            .iter()
            .any(|id| self.nodes.get(id).is_some_and(Node::is_commented_out));
        if commented {
            for id in self.component_of(child_node) {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.set_commented_out(true);
                }
            }
        }
        tracing::debug!("Connected {} -> {}", parent_node, child);
        Ok(())
    }

    /// Disconnect `child` from `parent`
    pub fn remove_edge(&mut self, parent: &SocketId, child: &SocketId) -> Result<(), EdgeError> {
        if !self.tree.contains_edge(parent, child) {
            return Err(EdgeError::NotConnected {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        self.tree.remove_child(child);
        self.signal_disconnected(std::slice::from_ref(child));
        Ok(())
    }

    /// Sever every edge whose segment between socket centres crosses the
    /// segment `p1`-`p2`. Children are signalled once all cuts are done.
    pub fn cut_crossing_segments(
        &mut self,
        p1: Point,
        p2: Point,
        socket_centre: impl Fn(&SocketId) -> Option<Point>,
    ) -> Vec<(SocketId, SocketId)> {
        let crossing: Vec<(SocketId, SocketId)> = self
            .tree
            .edges()
            .filter(|(parent, child)| {
                match (socket_centre(parent), socket_centre(child)) {
                    (Some(a), Some(b)) => segments_intersect(a, b, p1, p2),
                    _ => false,
                }
            })
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();

        for (_, child) in &crossing {
            self.tree.remove_child(child);
        }
        let children: Vec<SocketId> = crossing.iter().map(|(_, c)| c.clone()).collect();
        self.signal_disconnected(&children);
        crossing
    }

    /// Sever every edge touching a node
    pub fn sever_all_connections(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let inputs = node.input_sockets();
        let outputs = node.output_sockets();

        let mut disconnected = Vec::new();
        for socket in inputs {
            if self.tree.remove_child(&socket).is_some() {
                disconnected.push(socket);
            }
        }
        for socket in outputs {
            disconnected.extend(self.tree.remove_children(&socket));
        }
        self.signal_disconnected(&disconnected);
    }

    /// Sever every edge out of `parent`
    pub fn sever_children(&mut self, parent: &SocketId) -> Vec<SocketId> {
        let children = self.tree.remove_children(parent);
        self.signal_disconnected(&children);
        children
    }

    /// Sever the edge into `child`
    pub fn sever_parent(&mut self, child: &SocketId) -> Option<SocketId> {
        let parent = self.tree.remove_child(child)?;
        self.signal_disconnected(std::slice::from_ref(child));
        Some(parent)
    }

    fn signal_disconnected(&mut self, children: &[SocketId]) {
        for child in children {
            if let Some(node) = self.nodes.get_mut(&child.node_id()) {
                node.on_input_disconnected(child);
            }
        }
    }

    // ----- Id fixups -----

    /// Give a node a new id, updating every socket that refers to it
    pub fn fix_node_id(&mut self, old: NodeId, new: NodeId) -> Result<(), DocumentError> {
        if old == new {
            return Ok(());
        }
        if self.nodes.contains_key(&new) {
            return Err(DocumentError::DuplicateNodeId(new));
        }
        let Some(index) = self.nodes.get_index_of(&old) else {
            return Ok(());
        };
        let sockets: Vec<SocketId> = self
            .tree
            .sockets()
            .filter(|s| s.node_id() == old)
            .cloned()
            .collect();
        for socket in sockets {
            self.tree.rename_socket(&socket, &socket.with_node_id(new));
        }
        if let Some(mut node) = self.nodes.shift_remove(&old) {
            node.set_id(new);
            self.nodes.shift_insert(index, new, node);
        }
        Ok(())
    }

    /// Rename a parameter of a node, carrying its sockets and widgets along
    pub fn rename_parameter(&mut self, node_id: NodeId, old: &str, new: &str) {
        let sockets: Vec<SocketId> = self
            .tree
            .sockets()
            .filter(|s| {
                matches!(s, SocketId::Input { node_id: n, param, .. } if *n == node_id && param == old)
            })
            .cloned()
            .collect();
        for socket in sockets {
            if let SocketId::Input {
                node_id, subparam, ..
            } = &socket
            {
                let renamed = SocketId::Input {
                    node_id: *node_id,
                    param: new.to_string(),
                    subparam: *subparam,
                };
                self.tree.rename_socket(&socket, &renamed);
            }
        }
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.rename_parameter(old, new);
        }
    }

    /// Rename an output of a node
    pub fn rename_output(&mut self, node_id: NodeId, old: &str, new: &str) {
        self.tree
            .rename_socket(&SocketId::output(node_id, old), &SocketId::output(node_id, new));
    }

    /// Sever edges whose sockets no longer exist on their nodes, as after
    /// definitions changed on reload
    pub fn prune_stale_edges(&mut self) -> Vec<(SocketId, SocketId)> {
        let stale: Vec<(SocketId, SocketId)> = self
            .tree
            .edges()
            .filter(|(parent, child)| {
                [parent, child].iter().any(|socket| {
                    !self
                        .nodes
                        .get(&socket.node_id())
                        .is_some_and(|node| node.has_socket(socket))
                })
            })
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        for (parent, child) in &stale {
            tracing::warn!("Dropping edge {} -> {} to a socket that no longer exists", parent, child);
            self.tree.remove_child(child);
        }
        stale
    }

    // ----- Traversal -----

    /// Push a value to every child of `parent`, relaying through proxies
    pub fn push_to_children(&mut self, parent: &SocketId, value: &Value) {
        let children = self.tree.children_of(parent).to_vec();
        for child in children {
            match &child {
                SocketId::Proxy { .. } => self.push_to_children(&child, value),
                SocketId::Input { node_id, .. } => {
                    if let Some(node) = self.nodes.get_mut(node_id) {
                        node.receive_input(value.clone(), &child);
                    }
                }
                SocketId::Output { .. } => {}
            }
        }
    }

    /// Non-proxy nodes directly downstream of a node, looking through
    /// proxies
    pub fn direct_children(&self, node_id: NodeId) -> IndexSet<NodeId> {
        let mut children = IndexSet::new();
        let Some(node) = self.nodes.get(&node_id) else {
            return children;
        };
        let mut pending: Vec<SocketId> = node.output_sockets();
        let mut seen = HashSet::new();
        while let Some(socket) = pending.pop() {
            if !seen.insert(socket.clone()) {
                continue;
            }
            for child in self.tree.children_of(&socket) {
                match child {
                    SocketId::Proxy { .. } => pending.push(child.clone()),
                    other => {
                        children.insert(other.node_id());
                    }
                }
            }
        }
        children
    }

    /// Every node feeding `node_id`, transitively, proxies included
    pub fn upstream_nodes(&self, node_id: NodeId) -> IndexSet<NodeId> {
        let mut upstream = IndexSet::new();
        let mut queue = VecDeque::from([node_id]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for socket in node.input_sockets() {
                if let Some(parent) = self.tree.parent_of(&socket) {
                    let parent_node = parent.node_id();
                    if upstream.insert(parent_node) {
                        queue.push_back(parent_node);
                    }
                }
            }
        }
        upstream
    }

    /// Nodes connected to `node_id` ignoring edge direction, itself included
    pub fn component_of(&self, node_id: NodeId) -> IndexSet<NodeId> {
        let mut component = IndexSet::from([node_id]);
        let mut queue = VecDeque::from([node_id]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            let mut neighbours = Vec::new();
            for socket in node.input_sockets() {
                if let Some(parent) = self.tree.parent_of(&socket) {
                    neighbours.push(parent.node_id());
                }
            }
            for socket in node.output_sockets() {
                neighbours.extend(self.tree.children_of(&socket).iter().map(SocketId::node_id));
            }
            for neighbour in neighbours {
                if component.insert(neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }
        component
    }

    /// Connected components over all nodes, in node order
    pub fn components(&self) -> Vec<IndexSet<NodeId>> {
        let mut seen = HashSet::new();
        let mut components = Vec::new();
        for id in self.nodes.keys() {
            if seen.contains(id) {
                continue;
            }
            let component = self.component_of(*id);
            seen.extend(component.iter().copied());
            components.push(component);
        }
        components
    }

    /// For each node in `ids`, the ids in `ids` it directly depends on
    pub fn input_sources(&self, ids: &IndexSet<NodeId>) -> IndexMap<NodeId, HashSet<NodeId>> {
        let mut sources: IndexMap<NodeId, HashSet<NodeId>> =
            ids.iter().map(|id| (*id, HashSet::new())).collect();
        for id in ids {
            let children = if self.nodes.get(id).is_some_and(Node::is_proxy) {
                self.proxy_children(*id)
            } else {
                self.direct_children(*id)
            };
            for child in children {
                if let Some(set) = sources.get_mut(&child) {
                    set.insert(*id);
                }
            }
        }
        sources
    }

    fn proxy_children(&self, node_id: NodeId) -> IndexSet<NodeId> {
        self.tree
            .children_of(&SocketId::proxy(node_id))
            .iter()
            .map(SocketId::node_id)
            .collect()
    }
}

/// Peel nodes into generations: each generation holds the nodes whose
/// sources were all in earlier generations. Ids within a generation are
/// sorted.
pub fn generations(
    mut sources: IndexMap<NodeId, HashSet<NodeId>>,
) -> Result<Vec<Vec<NodeId>>, CycleError> {
    let mut result = Vec::new();
    while !sources.is_empty() {
        let mut generation: Vec<NodeId> = sources
            .iter()
            .filter(|(_, pending)| pending.is_empty())
            .map(|(id, _)| *id)
            .collect();
        if generation.is_empty() {
            return Err(CycleError);
        }
        generation.sort_unstable();
        for id in &generation {
            sources.shift_remove(id);
        }
        for pending in sources.values_mut() {
            for id in &generation {
                pending.remove(id);
            }
        }
        result.push(generation);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::Callable;
    use crate::definition::{DefinitionKind, NodeDefinition};
    use crate::node::{NodeRecord, WidgetRecord};
    use crate::signature::{Parameter, Signature};
    use std::sync::Arc;

    fn unary(id: NodeId) -> Node {
        let signature = Signature::new(vec![Parameter::positional("x")]).with_outputs(["y"]);
        let callable = Callable::new("f", Some(signature.clone()), |_| Ok(Value::None));
        let definition = NodeDefinition::new(DefinitionKind::Builtin("f".into()), callable, signature);
        let record = NodeRecord {
            id,
            builtin_id: Some("f".into()),
            ..NodeRecord::default()
        };
        Node::new(record, Some(Arc::new(definition)))
    }

    fn chain() -> Graph {
        let mut graph = Graph::new();
        for id in 1..=3 {
            graph.add_node(unary(id));
        }
        graph
            .add_edge(&SocketId::output(1, "y"), &SocketId::input(2, "x"))
            .unwrap();
        graph
            .add_edge(&SocketId::input(3, "x"), &SocketId::output(2, "y"))
            .unwrap();
        graph
    }

    #[test]
    fn test_edge_orientation_and_invariants() {
        let graph = chain();
        assert_eq!(
            graph.tree().parent_of(&SocketId::input(3, "x")),
            Some(&SocketId::output(2, "y"))
        );
        assert_eq!(
            graph.tree().children_of(&SocketId::output(2, "y")),
            &[SocketId::input(3, "x")]
        );
    }

    #[test]
    fn test_validate_edge_errors() {
        let graph = chain();
        let error = graph
            .validate_edge(&SocketId::input(1, "x"), &SocketId::input(2, "x"))
            .unwrap_err();
        assert!(error.is_type_error());
        assert!(matches!(
            graph.validate_edge(&SocketId::output(1, "y"), &SocketId::input(2, "x")),
            Err(EdgeError::AlreadyConnected { .. })
        ));
        assert!(matches!(
            graph.validate_edge(&SocketId::output(1, "y"), &SocketId::input(1, "x")),
            Err(EdgeError::SameNode { .. })
        ));
        assert!(matches!(
            graph.validate_edge(&SocketId::output(3, "y"), &SocketId::input(1, "x")),
            Err(EdgeError::WouldCreateCycle { .. })
        ));
    }

    #[test]
    fn test_cycle_through_proxy_is_rejected() {
        let mut graph = chain();
        graph.add_node(Node::new(NodeRecord::proxy(10), None));
        graph
            .add_edge(&SocketId::output(3, "y"), &SocketId::proxy(10))
            .unwrap();
        assert!(matches!(
            graph.add_edge(&SocketId::proxy(10), &SocketId::input(1, "x")),
            Err(EdgeError::WouldCreateCycle { .. })
        ));
    }

    #[test]
    fn test_commented_state_propagates() {
        let mut graph = Graph::new();
        for id in 1..=3 {
            graph.add_node(unary(id));
        }
        graph
            .add_edge(&SocketId::output(1, "y"), &SocketId::input(2, "x"))
            .unwrap();
        graph.node_mut(3).unwrap().set_commented_out(true);
        graph
            .add_edge(&SocketId::output(2, "y"), &SocketId::input(3, "x"))
            .unwrap();
        assert!(graph.nodes().all(Node::is_commented_out));

        graph
            .remove_edge(&SocketId::output(2, "y"), &SocketId::input(3, "x"))
            .unwrap();
        assert!(graph.nodes().all(Node::is_commented_out));
    }

    #[test]
    fn test_remove_edge_reinstates_widget() {
        let mut graph = Graph::new();
        graph.add_node(unary(1));
        let mut second = unary(2);
        second
            .record_mut()
            .param_widget_value_map
            .insert("x".into(), WidgetRecord::new(Value::Int(4)));
        graph.add_node(second);

        graph
            .add_edge(&SocketId::output(1, "y"), &SocketId::input(2, "x"))
            .unwrap();
        assert!(graph.node(2).unwrap().record().param_widget_value_map.is_empty());
        graph.sever_parent(&SocketId::input(2, "x"));
        assert_eq!(
            graph.node(2).unwrap().record().param_widget_value_map["x"].value,
            Value::Int(4)
        );
        assert_eq!(graph.tree().roots().count(), 0);
    }

    #[test]
    fn test_cut_crossing_segments() {
        let mut graph = chain();
        let centre = |socket: &SocketId| -> Option<Point> {
            let x = socket.node_id() as f64 * 10.0;
            match socket {
                SocketId::Output { .. } => Some((x + 5.0, 0.0)),
                _ => Some((x, 0.0)),
            }
        };
        // Scissor crossing only the 1 -> 2 edge, between x = 15 and x = 20
        let cut = graph.cut_crossing_segments((17.0, -5.0), (17.0, 5.0), centre);
        assert_eq!(cut, vec![(SocketId::output(1, "y"), SocketId::input(2, "x"))]);
        assert_eq!(graph.tree().edge_count(), 1);
    }

    #[test]
    fn test_sever_all_connections() {
        let mut graph = chain();
        graph.sever_all_connections(2);
        assert_eq!(graph.tree().edge_count(), 0);
    }

    #[test]
    fn test_fix_node_id() {
        let mut graph = chain();
        graph.fix_node_id(2, 20).unwrap();
        assert_eq!(
            graph.tree().parent_of(&SocketId::input(20, "x")),
            Some(&SocketId::output(1, "y"))
        );
        assert_eq!(
            graph.tree().parent_of(&SocketId::input(3, "x")),
            Some(&SocketId::output(20, "y"))
        );
        assert!(graph.fix_node_id(1, 3).is_err());
    }

    #[test]
    fn test_generations() {
        let graph = chain();
        let all: IndexSet<NodeId> = graph.node_ids().collect();
        assert_eq!(
            generations(graph.input_sources(&all)).unwrap(),
            vec![vec![1], vec![2], vec![3]]
        );
        assert_eq!(graph.upstream_nodes(3), IndexSet::from([2, 1]));
        assert_eq!(graph.components().len(), 1);
    }
}
