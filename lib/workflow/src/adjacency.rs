//! Output-port adjacency for branch propagation.

use crate::connection::Connection;
use crate::node::{Node, NodeId};
use std::collections::{HashMap, HashSet};

/// Maps each node to its output ports and the nodes wired to each port.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyIndex {
    outputs: HashMap<NodeId, HashMap<String, Vec<NodeId>>>,
    has_incoming: HashSet<NodeId>,
}

impl AdjacencyIndex {
    /// Builds the index. Targets keep connection order within each port.
    #[must_use]
    pub fn build(connections: &[Connection]) -> Self {
        let mut index = Self::default();
        for conn in connections {
            index
                .outputs
                .entry(conn.from_node_id.clone())
                .or_default()
                .entry(conn.from_output.clone())
                .or_default()
                .push(conn.to_node_id.clone());
            index.has_incoming.insert(conn.to_node_id.clone());
        }
        index
    }

    /// Targets attached to one output port of `node_id`.
    #[must_use]
    pub fn targets(&self, node_id: &NodeId, port: &str) -> &[NodeId] {
        self.outputs
            .get(node_id)
            .and_then(|ports| ports.get(port))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Targets across every output port of `node_id`.
    pub fn all_targets<'a>(
        &'a self,
        node_id: &NodeId,
    ) -> impl Iterator<Item = &'a NodeId> + use<'a> {
        self.outputs
            .get(node_id)
            .into_iter()
            .flat_map(|ports| ports.values().flatten())
    }

    /// Targets of every port of `node_id` except `port`.
    pub fn targets_except<'a>(
        &'a self,
        node_id: &NodeId,
        port: &'a str,
    ) -> impl Iterator<Item = &'a NodeId> + use<'a> {
        self.outputs
            .get(node_id)
            .into_iter()
            .flat_map(move |ports| {
                ports
                    .iter()
                    .filter(move |(name, _)| name.as_str() != port)
                    .flat_map(|(_, targets)| targets)
            })
    }

    /// Returns true if no connection points at `node_id`.
    #[must_use]
    pub fn is_root(&self, node_id: &NodeId) -> bool {
        !self.has_incoming.contains(node_id)
    }

    /// Root nodes of `nodes`, in the given order.
    pub fn roots<'a>(&'a self, nodes: &'a [Node]) -> impl Iterator<Item = &'a Node> + 'a {
        nodes.iter().filter(|n| self.is_root(&n.id))
    }
}
