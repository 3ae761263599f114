//! Execution and NodeExecution records.
//!
//! Both records move `RUNNING → SUCCESS | FAILED` and never back. Writing the
//! terminal state they already hold is accepted as a repeat of the same
//! update, so a replayed finalize step leaves one record behind.

use crate::error::StoreError;
use crate::node::{NodeId, NodeType};
use crate::trigger::TriggerKind;
use chrono::{DateTime, Utc};
use flowforge_core::{CorrelationId, ExecutionId, NodeExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status shared by runs and node executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

/// Node executions use the same lifecycle as runs.
pub type NodeExecutionStatus = ExecutionStatus;

impl ExecutionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Checks that moving from `self` to `next` is allowed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidStateTransition` when leaving a terminal
    /// state for a different one, or moving back to `RUNNING`.
    pub fn transition(self, next: Self) -> Result<Self, StoreError> {
        let allowed = match self {
            Self::Running => true,
            terminal => terminal == next,
        };
        if allowed {
            Ok(next)
        } else {
            Err(StoreError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::Backend {
                message: format!("unknown execution status '{other}'"),
            }),
        }
    }
}

/// Parameters for creating an Execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub correlation_id: CorrelationId,
    pub workflow_id: WorkflowId,
    pub trigger: Option<TriggerKind>,
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    /// Natural key; unique across all executions.
    pub correlation_id: CorrelationId,
    pub workflow_id: WorkflowId,
    pub trigger: Option<TriggerKind>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Final context variables, set on success.
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    /// Operator-facing rendering of the failure.
    pub error_stack: Option<String>,
}

impl Execution {
    /// A new execution in `RUNNING`.
    #[must_use]
    pub fn start(new: NewExecution) -> Self {
        Self {
            id: ExecutionId::new(),
            correlation_id: new.correlation_id,
            workflow_id: new.workflow_id,
            trigger: new.trigger,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
            error_stack: None,
        }
    }

    /// Marks the run successful with its final output.
    ///
    /// # Errors
    ///
    /// Fails if the run already failed.
    pub fn complete(&mut self, output: JsonValue) -> Result<(), StoreError> {
        self.status = self.status.transition(ExecutionStatus::Success)?;
        self.completed_at.get_or_insert_with(Utc::now);
        self.output = Some(output);
        Ok(())
    }

    /// Marks the run failed.
    ///
    /// # Errors
    ///
    /// Fails if the run already succeeded.
    pub fn fail(&mut self, error: String, stack: Option<String>) -> Result<(), StoreError> {
        self.status = self.status.transition(ExecutionStatus::Failed)?;
        self.completed_at.get_or_insert_with(Utc::now);
        self.error = Some(error);
        self.error_stack = stack;
        Ok(())
    }
}

/// Parameters for recording that a node started.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNodeExecution {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_type: NodeType,
    /// Context variables the node received.
    pub input: JsonValue,
}

/// The record of one node's execution within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: NodeExecutionId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_type: NodeType,
    pub status: NodeExecutionStatus,
    pub input: JsonValue,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    #[must_use]
    pub fn start(new: NewNodeExecution) -> Self {
        Self {
            id: NodeExecutionId::new(),
            execution_id: new.execution_id,
            node_id: new.node_id,
            node_name: new.node_name,
            node_type: new.node_type,
            status: ExecutionStatus::Running,
            input: new.input,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// # Errors
    ///
    /// Fails if the node already failed.
    pub fn complete(&mut self, output: JsonValue) -> Result<(), StoreError> {
        self.status = self.status.transition(ExecutionStatus::Success)?;
        self.completed_at.get_or_insert_with(Utc::now);
        self.output = Some(output);
        Ok(())
    }

    /// # Errors
    ///
    /// Fails if the node already succeeded.
    pub fn fail(&mut self, error: String) -> Result<(), StoreError> {
        self.status = self.status.transition(ExecutionStatus::Failed)?;
        self.completed_at.get_or_insert_with(Utc::now);
        self.error = Some(error);
        Ok(())
    }
}
