//! Error types for the workflow crate.
//!
//! - `GraphError`: structural problems found while ordering a graph
//! - `ExecutionError`: failures raised by one node's executor or its steps
//! - `StoreError`: persistence collaborator failures
//! - `WorkflowError`: run-level failures, wrapping the lower layers
//!
//! Retry decisions are made on `ExecutionError::is_retriable`; everything
//! else aborts the run on first occurrence.

use crate::node::NodeId;
use flowforge_core::{CorrelationId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from graph ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphError {
    /// Connections form at least one cycle.
    CycleDetected,
    /// A node referenced during traversal is not part of the workflow.
    NodeNotFound { node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "workflow contains a cycle"),
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors raised while executing a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A required field is absent from the node's data.
    MissingField { node_id: NodeId, field: String },
    /// The node's data is present but unusable.
    InvalidConfig { node_id: NodeId, reason: String },
    /// The referenced credential does not exist for the run's user.
    CredentialNotFound { node_id: NodeId, credential_id: String },
    /// A template failed to compile or render.
    Template { node_id: NodeId, reason: String },
    /// A network-level failure that may succeed on retry.
    Transient { node_id: NodeId, reason: String },
    /// The provider answered with a permanent failure.
    Provider { node_id: NodeId, reason: String },
    /// The persistence collaborator failed inside a step.
    Persistence { reason: String },
    /// A step result could not be encoded or decoded.
    Serialization { reason: String },
}

impl ExecutionError {
    /// Returns true if the step runner may re-attempt the failed unit.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Persistence { .. })
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { node_id, field } => {
                write!(f, "node {node_id}: required field '{field}' is missing")
            }
            Self::InvalidConfig { node_id, reason } => {
                write!(f, "node {node_id}: invalid configuration: {reason}")
            }
            Self::CredentialNotFound {
                node_id,
                credential_id,
            } => {
                write!(f, "node {node_id}: credential {credential_id} not found")
            }
            Self::Template { node_id, reason } => {
                write!(f, "node {node_id}: template error: {reason}")
            }
            Self::Transient { node_id, reason } => {
                write!(f, "node {node_id}: transient failure: {reason}")
            }
            Self::Provider { node_id, reason } => {
                write!(f, "node {node_id}: provider error: {reason}")
            }
            Self::Persistence { reason } => write!(f, "persistence failed: {reason}"),
            Self::Serialization { reason } => {
                write!(f, "step result serialization failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<StoreError> for ExecutionError {
    fn from(e: StoreError) -> Self {
        Self::Persistence {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed record does not exist.
    NotFound { entity: &'static str, key: String },
    /// A terminal record was asked to move again.
    InvalidStateTransition { from: String, to: String },
    /// The backing store failed.
    Backend { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid state transition from {from} to {to}")
            }
            Self::Backend { message } => write!(f, "store backend error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Run-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The run request carried no correlation id.
    MissingCorrelationId,
    /// The run request carried no workflow id.
    MissingWorkflowId,
    /// The workflow does not exist.
    NotFound { workflow_id: WorkflowId },
    /// The graph could not be ordered.
    Graph(GraphError),
    /// A node's executor failed and the run was aborted.
    NodeFailed {
        node_id: NodeId,
        source: ExecutionError,
    },
    /// A branching node finished without producing a branch decision.
    MissingBranchResult { node_id: NodeId },
    /// Run-level persistence failed.
    Persistence {
        correlation_id: CorrelationId,
        reason: String,
    },
    /// A terminal Execution was asked to transition again.
    InvalidStateTransition { from: String, to: String },
}

impl WorkflowError {
    /// Setup errors are raised before any node runs.
    #[must_use]
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::MissingCorrelationId
                | Self::MissingWorkflowId
                | Self::NotFound { .. }
                | Self::Graph(_)
        )
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCorrelationId => write!(f, "run request is missing its correlation id"),
            Self::MissingWorkflowId => write!(f, "run request is missing its workflow id"),
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::Graph(e) => write!(f, "{e}"),
            Self::NodeFailed { source, .. } => write!(f, "{source}"),
            Self::MissingBranchResult { node_id } => {
                write!(f, "condition node {node_id} produced no branch result")
            }
            Self::Persistence {
                correlation_id,
                reason,
            } => {
                write!(f, "persistence failed for run {correlation_id}: {reason}")
            }
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid state transition from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(e) => Some(e),
            Self::NodeFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<GraphError> for WorkflowError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_is_user_facing() {
        let err = WorkflowError::from(GraphError::CycleDetected);
        assert_eq!(err.to_string(), "workflow contains a cycle");
        assert!(err.is_setup());
    }

    #[test]
    fn only_transient_and_persistence_retry() {
        let node_id = NodeId::from("http");
        assert!(
            ExecutionError::Transient {
                node_id: node_id.clone(),
                reason: "connection reset".to_string(),
            }
            .is_retriable()
        );
        assert!(
            !ExecutionError::MissingField {
                node_id: node_id.clone(),
                field: "endpoint".to_string(),
            }
            .is_retriable()
        );
        assert!(
            !ExecutionError::CredentialNotFound {
                node_id,
                credential_id: "cred_x".to_string(),
            }
            .is_retriable()
        );
    }

    #[test]
    fn node_failure_surfaces_executor_message() {
        let err = WorkflowError::NodeFailed {
            node_id: NodeId::from("cond"),
            source: ExecutionError::MissingField {
                node_id: NodeId::from("cond"),
                field: "operator".to_string(),
            },
        };
        assert!(err.to_string().contains("required field 'operator'"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_setup());
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::NotFound {
            entity: "execution",
            key: "evt_1".to_string(),
        };
        assert!(err.to_string().contains("execution not found"));
    }
}
