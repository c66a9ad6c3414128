// SPDX-License-Identifier: MIT OR Apache-2.0
//! Socket identities.
//!
//! A socket is addressed by its node and, depending on its kind, an output
//! name, a parameter name (plus a subparameter index for variable-kind
//! parameters) or nothing at all (the single socket of a proxy node).

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Socket kind, as persisted in `class_name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketKind {
    /// Output of a node
    #[serde(rename = "OutputSocket")]
    Output,
    /// Input of a node parameter or subparameter
    #[serde(rename = "InputSocket")]
    Input,
    /// The relay socket of a proxy node
    #[serde(rename = "ProxySocket")]
    Proxy,
}

/// Unique identity of a socket within a graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SocketId {
    /// `(node_id, output_name)`
    Output {
        /// Owning node
        node_id: NodeId,
        /// Output name
        name: String,
    },
    /// `(node_id, parameter_name)` or `(node_id, parameter_name, subparameter_index)`
    Input {
        /// Owning node
        node_id: NodeId,
        /// Parameter name
        param: String,
        /// Subparameter index for variable-kind parameters
        subparam: Option<usize>,
    },
    /// `(node_id)`
    Proxy {
        /// Owning node
        node_id: NodeId,
    },
}

impl SocketId {
    /// Output socket id
    pub fn output(node_id: NodeId, name: impl Into<String>) -> Self {
        Self::Output {
            node_id,
            name: name.into(),
        }
    }

    /// Input socket id of a regular parameter
    pub fn input(node_id: NodeId, param: impl Into<String>) -> Self {
        Self::Input {
            node_id,
            param: param.into(),
            subparam: None,
        }
    }

    /// Input socket id of a subparameter
    pub fn subparam(node_id: NodeId, param: impl Into<String>, index: usize) -> Self {
        Self::Input {
            node_id,
            param: param.into(),
            subparam: Some(index),
        }
    }

    /// Proxy socket id
    pub fn proxy(node_id: NodeId) -> Self {
        Self::Proxy { node_id }
    }

    /// Owning node
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Output { node_id, .. } | Self::Input { node_id, .. } | Self::Proxy { node_id } => {
                *node_id
            }
        }
    }

    /// Socket kind
    pub fn kind(&self) -> SocketKind {
        match self {
            Self::Output { .. } => SocketKind::Output,
            Self::Input { .. } => SocketKind::Input,
            Self::Proxy { .. } => SocketKind::Proxy,
        }
    }

    /// Whether the socket may act as a parent (outputs and proxies)
    pub fn can_be_parent(&self) -> bool {
        !matches!(self, Self::Input { .. })
    }

    /// Whether the socket may act as a child (inputs and proxies)
    pub fn can_be_child(&self) -> bool {
        !matches!(self, Self::Output { .. })
    }

    /// Same socket on a node with a different id
    pub fn with_node_id(&self, new_id: NodeId) -> Self {
        let mut socket = self.clone();
        match &mut socket {
            Self::Output { node_id, .. } | Self::Input { node_id, .. } | Self::Proxy { node_id } => {
                *node_id = new_id;
            }
        }
        socket
    }

    /// Build from a persisted `(class_name, id)` pair
    pub fn from_record(kind: SocketKind, parts: &[IdPart]) -> Option<Self> {
        match (kind, parts) {
            (SocketKind::Output, [IdPart::Int(node_id), IdPart::Str(name)]) => {
                Some(Self::output(*node_id, name.clone()))
            }
            (SocketKind::Input, [IdPart::Int(node_id), IdPart::Str(param)]) => {
                Some(Self::input(*node_id, param.clone()))
            }
            (SocketKind::Input, [IdPart::Int(node_id), IdPart::Str(param), IdPart::Int(index)]) => {
                Some(Self::subparam(*node_id, param.clone(), usize::try_from(*index).ok()?))
            }
            (SocketKind::Proxy, [IdPart::Int(node_id)]) => Some(Self::proxy(*node_id)),
            _ => None,
        }
    }

    /// Persisted id parts
    pub fn to_record(&self) -> Vec<IdPart> {
        match self {
            Self::Output { node_id, name } => vec![IdPart::Int(*node_id), IdPart::Str(name.clone())],
            Self::Input {
                node_id,
                param,
                subparam: None,
            } => vec![IdPart::Int(*node_id), IdPart::Str(param.clone())],
            Self::Input {
                node_id,
                param,
                subparam: Some(index),
            } => vec![
                IdPart::Int(*node_id),
                IdPart::Str(param.clone()),
                IdPart::Int(*index as u64),
            ],
            Self::Proxy { node_id } => vec![IdPart::Int(*node_id)],
        }
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output { node_id, name } => write!(f, "output({node_id}, {name})"),
            Self::Input {
                node_id,
                param,
                subparam: None,
            } => write!(f, "input({node_id}, {param})"),
            Self::Input {
                node_id,
                param,
                subparam: Some(index),
            } => write!(f, "input({node_id}, {param}, {index})"),
            Self::Proxy { node_id } => write!(f, "proxy({node_id})"),
        }
    }
}

/// One element of a persisted socket id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdPart {
    /// Node id or subparameter index
    Int(u64),
    /// Output or parameter name
    Str(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip_shapes() {
        let sub = SocketId::subparam(4, "args", 2);
        let parts = sub.to_record();
        assert_eq!(parts.len(), 3);
        assert_eq!(SocketId::from_record(SocketKind::Input, &parts), Some(sub));

        let proxy_parts = vec![IdPart::Int(9)];
        assert_eq!(
            SocketId::from_record(SocketKind::Proxy, &proxy_parts),
            Some(SocketId::proxy(9))
        );
        assert_eq!(SocketId::from_record(SocketKind::Output, &proxy_parts), None);
    }

    #[test]
    fn test_roles() {
        assert!(SocketId::output(1, "y").can_be_parent());
        assert!(!SocketId::output(1, "y").can_be_child());
        assert!(SocketId::proxy(1).can_be_parent() && SocketId::proxy(1).can_be_child());
        assert!(!SocketId::input(1, "x").can_be_parent());
    }
}
