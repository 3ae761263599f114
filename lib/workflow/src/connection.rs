//! Port-qualified connections between nodes.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Output port used by every non-branching node.
pub const DEFAULT_PORT: &str = "main";

/// Port a condition node takes when its comparison holds.
pub const TRUE_PORT: &str = "source-true";

/// Port a condition node takes when its comparison fails.
pub const FALSE_PORT: &str = "source-false";

/// A directed edge from one node's named output port to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from_node_id: NodeId,
    #[serde(default = "default_port")]
    pub from_output: String,
    pub to_node_id: NodeId,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

impl Connection {
    /// Connects `from` to `to` through the default port.
    #[must_use]
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self::from_port(from, DEFAULT_PORT, to)
    }

    /// Connects `from` to `to` through the named output port.
    #[must_use]
    pub fn from_port(
        from: impl Into<NodeId>,
        port: impl Into<String>,
        to: impl Into<NodeId>,
    ) -> Self {
        Self {
            from_node_id: from.into(),
            from_output: port.into(),
            to_node_id: to.into(),
        }
    }
}
