// SPDX-License-Identifier: MIT OR Apache-2.0
//! The parenthood forest over sockets.
//!
//! Each tree is rooted at a parent socket (an output or a proxy) and fans out
//! to its children. The forest only stores structure; validation against
//! node definitions lives in [`crate::graph::Graph`].

use crate::error::DocumentError;
use crate::socket::{IdPart, SocketId, SocketKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted tree record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketRecord {
    /// Socket id parts
    pub id: Vec<IdPart>,
    /// Socket kind
    pub class_name: SocketKind,
    /// Child records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SocketRecord>,
}

impl SocketRecord {
    fn socket_id(&self) -> Result<SocketId, DocumentError> {
        SocketId::from_record(self.class_name, &self.id)
            .ok_or_else(|| DocumentError::InvalidSocket(format!("{:?} {:?}", self.class_name, self.id)))
    }

    fn leaf(socket: &SocketId) -> Self {
        Self {
            id: socket.to_record(),
            class_name: socket.kind(),
            children: Vec::new(),
        }
    }
}

/// Parent to children forest with a reverse index
#[derive(Debug, Clone, Default)]
pub struct SocketTree {
    children: IndexMap<SocketId, Vec<SocketId>>,
    parents: HashMap<SocketId, SocketId>,
}

impl SocketTree {
    /// Create an empty forest
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records, flattening nested children into
    /// their own trees
    pub fn from_records(records: &[SocketRecord]) -> Result<Self, DocumentError> {
        let mut tree = Self::new();
        let mut pending: Vec<&SocketRecord> = records.iter().collect();
        while let Some(record) = pending.pop() {
            let parent = record.socket_id()?;
            for child_record in &record.children {
                let child = child_record.socket_id()?;
                if tree.parents.contains_key(&child) {
                    return Err(DocumentError::DuplicateChild(child));
                }
                tree.insert(parent.clone(), child);
                if !child_record.children.is_empty() {
                    pending.push(child_record);
                }
            }
        }
        Ok(tree)
    }

    /// One flat record per parent socket
    pub fn to_records(&self) -> Vec<SocketRecord> {
        self.children
            .iter()
            .map(|(parent, children)| SocketRecord {
                id: parent.to_record(),
                class_name: parent.kind(),
                children: children.iter().map(SocketRecord::leaf).collect(),
            })
            .collect()
    }

    /// Parent of `child`, if connected
    pub fn parent_of(&self, child: &SocketId) -> Option<&SocketId> {
        self.parents.get(child)
    }

    /// Children of `parent`, empty when it roots no tree
    pub fn children_of(&self, parent: &SocketId) -> &[SocketId] {
        self.children.get(parent).map_or(&[], Vec::as_slice)
    }

    /// Whether `parent` directly feeds `child`
    pub fn contains_edge(&self, parent: &SocketId, child: &SocketId) -> bool {
        self.parents.get(child) == Some(parent)
    }

    /// All edges as `(parent, child)` pairs, in tree order
    pub fn edges(&self) -> impl Iterator<Item = (&SocketId, &SocketId)> {
        self.children
            .iter()
            .flat_map(|(parent, children)| children.iter().map(move |child| (parent, child)))
    }

    /// Parent sockets rooting a tree
    pub fn roots(&self) -> impl Iterator<Item = &SocketId> {
        self.children.keys()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.parents.len()
    }

    /// Attach `child` to `parent`, returning the parent it replaced
    pub fn insert(&mut self, parent: SocketId, child: SocketId) -> Option<SocketId> {
        let previous = self.remove_child(&child);
        self.children.entry(parent.clone()).or_default().push(child.clone());
        self.parents.insert(child, parent);
        previous
    }

    /// Detach `child` from its parent, dropping the parent's tree when it
    /// loses its last child
    pub fn remove_child(&mut self, child: &SocketId) -> Option<SocketId> {
        let parent = self.parents.remove(child)?;
        if let Some(children) = self.children.get_mut(&parent) {
            children.retain(|c| c != child);
            if children.is_empty() {
                self.children.shift_remove(&parent);
            }
        }
        Some(parent)
    }

    /// Detach every child of `parent`, returning them
    pub fn remove_children(&mut self, parent: &SocketId) -> Vec<SocketId> {
        let children = self.children.shift_remove(parent).unwrap_or_default();
        for child in &children {
            self.parents.remove(child);
        }
        children
    }

    /// Replace every occurrence of a socket id with another
    pub fn rename_socket(&mut self, old: &SocketId, new: &SocketId) {
        if old == new {
            return;
        }
        if let Some(children) = self.children.shift_remove(old) {
            for child in &children {
                self.parents.insert(child.clone(), new.clone());
            }
            self.children.insert(new.clone(), children);
        }
        if let Some(parent) = self.parents.remove(old) {
            if let Some(children) = self.children.get_mut(&parent) {
                for child in children.iter_mut().filter(|c| *c == old) {
                    *child = new.clone();
                }
            }
            self.parents.insert(new.clone(), parent);
        }
    }

    /// Every socket id appearing in the forest
    pub fn sockets(&self) -> impl Iterator<Item = &SocketId> {
        self.children.keys().chain(self.parents.keys())
    }
}

/// A point in canvas coordinates
pub type Point = (f64, f64);

fn orientation(p: Point, q: Point, r: Point) -> i8 {
    let value = (q.1 - p.1) * (r.0 - q.0) - (q.0 - p.0) * (r.1 - q.1);
    if value > 0.0 {
        1
    } else if value < 0.0 {
        2
    } else {
        0
    }
}

fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.0 <= p.0.max(r.0) && q.0 >= p.0.min(r.0) && q.1 <= p.1.max(r.1) && q.1 >= p.1.min(r.1)
}

/// Whether segment `p1`-`q1` intersects segment `p2`-`q2`, collinear
/// overlaps included
pub fn segments_intersect(p1: Point, q1: Point, p2: Point, q2: Point) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, q2, q1))
        || (o3 == 0 && on_segment(p2, p1, q2))
        || (o4 == 0 && on_segment(p2, q1, q2))
}
