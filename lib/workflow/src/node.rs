//! Workflow nodes.
//!
//! A node is one unit of work: a trigger that seeds the run or an action
//! that transforms the context. Its behavior is selected by `NodeType`, and
//! the type-specific configuration lives in the free-form `data` payload.

use crate::trigger::TriggerKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Identifier of a node, unique within its workflow.
///
/// Node ids are assigned by the editor and are opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The closed set of node kinds the engine can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Placeholder entry node created with every new workflow.
    Initial,
    /// Started by a user from the editor.
    ManualTrigger,
    /// Started by an inbound HTTP delivery.
    Webhook,
    /// Started by the scheduler when its cron expression matches.
    CronTrigger,
    /// Routes the run down its `source-true` or `source-false` port.
    Condition,
    /// Performs an outbound HTTP call.
    HttpRequest,
}

impl NodeType {
    /// All node types, in declaration order.
    pub const ALL: [NodeType; 6] = [
        Self::Initial,
        Self::ManualTrigger,
        Self::Webhook,
        Self::CronTrigger,
        Self::Condition,
        Self::HttpRequest,
    ];

    /// Returns the trigger kind for trigger nodes, `None` for actions.
    #[must_use]
    pub fn trigger_kind(&self) -> Option<TriggerKind> {
        match self {
            Self::Initial | Self::ManualTrigger => Some(TriggerKind::Manual),
            Self::Webhook => Some(TriggerKind::Webhook),
            Self::CronTrigger => Some(TriggerKind::Cron),
            Self::Condition | Self::HttpRequest => None,
        }
    }

    /// Returns true if this node chooses a single output port.
    #[must_use]
    pub fn is_branching(&self) -> bool {
        matches!(self, Self::Condition)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::ManualTrigger => "MANUAL_TRIGGER",
            Self::Webhook => "WEBHOOK",
            Self::CronTrigger => "CRON_TRIGGER",
            Self::Condition => "CONDITION",
            Self::HttpRequest => "HTTP_REQUEST",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognized node type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNodeType(pub String);

impl fmt::Display for UnknownNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown node type: {}", self.0)
    }
}

impl std::error::Error for UnknownNodeType {}

impl FromStr for NodeType {
    type Err = UnknownNodeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownNodeType(s.to_string()))
    }
}

/// A node in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Display label.
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Type-specific configuration.
    #[serde(default)]
    pub data: JsonValue,
}

impl Node {
    /// Creates a node with empty configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            data: JsonValue::Object(serde_json::Map::new()),
        }
    }

    /// Replaces the node configuration.
    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    /// Returns a string field from the node data, treating blank as absent.
    #[must_use]
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data
            .get(field)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}
