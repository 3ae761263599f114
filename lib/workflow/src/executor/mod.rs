//! Node executors.
//!
//! An executor turns one node plus the incoming [`RunContext`] into the
//! outgoing context. Side effects go through the run's [`StepRunner`]; live
//! progress goes through the [`StatusHandle`] on the executor's channel.

mod condition;
mod http_request;
mod registry;
mod trigger;

pub use condition::ConditionExecutor;
pub use http_request::HttpRequestExecutor;
pub use registry::ExecutorRegistry;
pub use trigger::TriggerExecutor;

use crate::context::RunContext;
use crate::error::ExecutionError;
use crate::node::{Node, NodeId};
use crate::status::{NodeStatus, StatusHandle};
use crate::step::StepRunner;
use async_trait::async_trait;
use flowforge_core::{CorrelationId, UserId, WorkflowId};
use std::future::Future;

/// Identifiers of the run a node executes in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub user_id: UserId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub correlation_id: CorrelationId,
}

/// Everything an executor receives for one node.
pub struct ExecutorInput<'a> {
    pub node: &'a Node,
    pub context: RunContext,
    pub meta: RunMetadata,
    pub steps: &'a dyn StepRunner,
    pub status: &'a StatusHandle,
}

/// Behavior of one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Status channel this executor publishes on.
    fn channel(&self) -> &'static str;

    /// Runs the node, returning the context for downstream nodes.
    ///
    /// Implementations publish `loading` first and exactly one of `success`
    /// or `error` before returning.
    async fn execute(&self, input: ExecutorInput<'_>) -> Result<RunContext, ExecutionError>;
}

/// Publishes `loading`, awaits `work`, then publishes the matching terminal
/// status.
pub async fn with_status<F>(
    status: &StatusHandle,
    channel: &str,
    node_id: &NodeId,
    work: F,
) -> Result<RunContext, ExecutionError>
where
    F: Future<Output = Result<RunContext, ExecutionError>> + Send,
{
    status.publish(channel, node_id, NodeStatus::Loading).await;
    let result = work.await;
    let terminal = match result {
        Ok(_) => NodeStatus::Success,
        Err(_) => NodeStatus::Error,
    };
    status.publish(channel, node_id, terminal).await;
    result
}

/// A non-blank string field of the node's data.
pub(crate) fn required<'n>(node: &'n Node, field: &str) -> Result<&'n str, ExecutionError> {
    node.data_str(field).ok_or_else(|| ExecutionError::MissingField {
        node_id: node.id.clone(),
        field: field.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::status::RecordingStatusPublisher;
    use crate::step::{InMemoryStepRunner, RetryPolicy};
    use std::sync::Arc;

    /// Collaborators for driving a single executor in tests.
    pub struct Harness {
        pub steps: InMemoryStepRunner,
        pub recorder: RecordingStatusPublisher,
        pub status: StatusHandle,
        pub user_id: UserId,
    }

    impl Harness {
        pub fn new() -> Self {
            let recorder = RecordingStatusPublisher::new();
            Self {
                steps: InMemoryStepRunner::new(RetryPolicy::none()),
                status: StatusHandle::new(Arc::new(recorder.clone())),
                recorder,
                user_id: UserId::new(),
            }
        }

        pub async fn run(
            &self,
            executor: &dyn NodeExecutor,
            node: &Node,
            context: RunContext,
        ) -> Result<RunContext, ExecutionError> {
            executor
                .execute(ExecutorInput {
                    node,
                    context,
                    meta: RunMetadata {
                        user_id: self.user_id,
                        workflow_id: WorkflowId::new(),
                        node_id: node.id.clone(),
                        correlation_id: CorrelationId::new(),
                    },
                    steps: &self.steps,
                    status: &self.status,
                })
                .await
        }
    }
}
