//! Trigger kinds and the normalized run request every trigger surface emits.

use chrono::{DateTime, Utc};
use flowforge_core::{CorrelationId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// The surface that started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A user pressed "execute" in the editor.
    Manual,
    /// An inbound HTTP delivery.
    Webhook,
    /// A scheduler tick matched a cron expression.
    Cron,
}

impl TriggerKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Webhook => "webhook",
            Self::Cron => "cron",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognized trigger kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTriggerKind(pub String);

impl fmt::Display for UnknownTriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown trigger kind: {}", self.0)
    }
}

impl std::error::Error for UnknownTriggerKind {}

impl FromStr for TriggerKind {
    type Err = UnknownTriggerKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "webhook" => Ok(Self::Webhook),
            "cron" => Ok(Self::Cron),
            other => Err(UnknownTriggerKind(other.to_string())),
        }
    }
}

/// A request to start one run of a workflow.
///
/// `correlation_id` and `workflow_id` are optional on the wire so that a
/// malformed request can be rejected by the engine as a setup error rather
/// than failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub correlation_id: Option<CorrelationId>,
    pub workflow_id: Option<WorkflowId>,
    /// Seed for the run context.
    #[serde(default)]
    pub initial_data: JsonValue,
    /// When set, only root nodes of this trigger kind activate.
    #[serde(default)]
    pub trigger: Option<TriggerKind>,
    pub requested_at: DateTime<Utc>,
}

impl RunRequest {
    /// Builds a request with a fresh correlation id.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, initial_data: JsonValue) -> Self {
        Self {
            correlation_id: Some(CorrelationId::new()),
            workflow_id: Some(workflow_id),
            initial_data,
            trigger: None,
            requested_at: Utc::now(),
        }
    }

    /// Restricts root activation to the given trigger kind.
    #[must_use]
    pub fn with_trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = Some(trigger);
        self
    }
}
