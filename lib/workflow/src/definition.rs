//! Workflow definitions as loaded for a run.

use crate::connection::Connection;
use crate::node::{Node, NodeId, NodeType};
use flowforge_core::{UserId, WorkflowId};
use serde::{Deserialize, Serialize};

/// A workflow together with its nodes and connections.
///
/// The engine reads this once at the start of a run and never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    /// Owner; executors resolve credentials against this user.
    pub user_id: UserId,
    pub name: String,
    /// Nodes in their stored order.
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

impl Workflow {
    /// Creates an empty workflow.
    #[must_use]
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            user_id,
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Appends a connection.
    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Returns true if any node has the given type.
    #[must_use]
    pub fn has_node_type(&self, node_type: NodeType) -> bool {
        self.nodes.iter().any(|n| n.node_type == node_type)
    }
}
