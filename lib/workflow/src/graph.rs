//! Execution ordering for workflow graphs.
//!
//! Nodes become petgraph vertices in stored order and connections become
//! edges, so isolated nodes take part in the sort without any marker edges.

use crate::connection::Connection;
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Orders `nodes` so that every node follows all nodes with edges into it.
///
/// With no connections the stored order is returned unchanged. Connections
/// naming a node outside `nodes` are ignored.
///
/// # Errors
///
/// Returns `GraphError::CycleDetected` if the connections form a cycle.
pub fn topological_sort(
    nodes: &[Node],
    connections: &[Connection],
) -> Result<Vec<Node>, GraphError> {
    if connections.is_empty() {
        return Ok(nodes.to_vec());
    }

    // Vertex weight is the node's position in `nodes`.
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), connections.len());
    let mut index: HashMap<&NodeId, NodeIndex> = HashMap::with_capacity(nodes.len());
    for (position, node) in nodes.iter().enumerate() {
        index
            .entry(&node.id)
            .or_insert_with(|| graph.add_node(position));
    }

    for conn in connections {
        match (index.get(&conn.from_node_id), index.get(&conn.to_node_id)) {
            (Some(&from), Some(&to)) => {
                graph.add_edge(from, to, ());
            }
            _ => warn!(
                from = %conn.from_node_id,
                to = %conn.to_node_id,
                "ignoring connection to a node outside the workflow"
            ),
        }
    }

    let order = toposort(&graph, None).map_err(|_| GraphError::CycleDetected)?;

    let mut seen = HashSet::with_capacity(order.len());
    Ok(order
        .into_iter()
        .map(|ix| graph[ix])
        .filter(|position| seen.insert(*position))
        .map(|position| nodes[position].clone())
        .collect())
}
