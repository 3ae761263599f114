//! Persistence contracts consumed by the engine and the scheduler.

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::{Execution, NewExecution, NewNodeExecution, NodeExecution};
use crate::node::NodeId;
use async_trait::async_trait;
use flowforge_core::{CorrelationId, ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A cron trigger node as seen by the scheduler scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronTriggerNode {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub data: JsonValue,
}

impl CronTriggerNode {
    /// The configured cron expression, if any.
    #[must_use]
    pub fn cron(&self) -> Option<&str> {
        self.data
            .get("cron")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Filter and page selection for listing executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionQuery {
    pub workflow_id: Option<WorkflowId>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl ExecutionQuery {
    pub const DEFAULT_PAGE: u32 = 1;
    pub const DEFAULT_PAGE_SIZE: u32 = 5;
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Rows to skip before this page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

impl Default for ExecutionQuery {
    fn default() -> Self {
        Self {
            workflow_id: None,
            page: Self::DEFAULT_PAGE,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of executions, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPage {
    pub items: Vec<Execution>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl ExecutionPage {
    #[must_use]
    pub fn new(items: Vec<Execution>, query: &ExecutionQuery, total_count: u64) -> Self {
        let page_size = u64::from(query.page_size.max(1));
        let total_pages = total_count.div_ceil(page_size);
        Self {
            items,
            page: query.page,
            page_size: query.page_size,
            total_count,
            total_pages,
            has_next_page: u64::from(query.page) < total_pages,
            has_previous_page: query.page > 1,
        }
    }
}

/// Read access to workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Loads a workflow with all nodes and connections.
    async fn load_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError>;

    /// Every `CRON_TRIGGER` node across all workflows.
    async fn cron_triggers(&self) -> Result<Vec<CronTriggerNode>, StoreError>;
}

/// Run and node execution records, written only by the orchestrator.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Creates the execution, or returns the one already stored under the
    /// same correlation id.
    async fn create_execution(&self, new: NewExecution) -> Result<Execution, StoreError>;

    async fn complete_execution(
        &self,
        correlation_id: CorrelationId,
        output: JsonValue,
    ) -> Result<Execution, StoreError>;

    async fn fail_execution(
        &self,
        correlation_id: CorrelationId,
        error: String,
        error_stack: Option<String>,
    ) -> Result<Execution, StoreError>;

    async fn execution(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<Execution>, StoreError>;

    /// Records the node as running, or returns the existing record for the
    /// same (execution, node) pair.
    async fn start_node_execution(
        &self,
        new: NewNodeExecution,
    ) -> Result<NodeExecution, StoreError>;

    async fn complete_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        output: JsonValue,
    ) -> Result<NodeExecution, StoreError>;

    async fn fail_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        error: String,
    ) -> Result<NodeExecution, StoreError>;

    /// Node executions of a run in the order they started.
    async fn node_executions(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<NodeExecution>, StoreError>;

    /// Executions matching `query`, most recently started first.
    async fn list_executions(&self, query: &ExecutionQuery) -> Result<ExecutionPage, StoreError>;
}
