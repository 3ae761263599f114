//! In-process store used by tests and single-node deployments without a
//! database.

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::{Execution, NewExecution, NewNodeExecution, NodeExecution};
use crate::node::{NodeId, NodeType};
use crate::store::{
    CronTriggerNode, ExecutionPage, ExecutionQuery, ExecutionStore, WorkflowStore,
};
use async_trait::async_trait;
use flowforge_core::{CorrelationId, ExecutionId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    workflows: HashMap<WorkflowId, Workflow>,
    executions: HashMap<CorrelationId, Execution>,
    // Insertion order doubles as start order.
    node_executions: Vec<NodeExecution>,
}

/// Workflow and execution store backed by shared memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a workflow definition.
    ///
    /// # Errors
    ///
    /// Fails only if the store lock is poisoned.
    pub fn put_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        self.lock()?.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    /// Number of stored executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.lock().map(|s| s.executions.len()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })
    }
}

fn missing_execution(correlation_id: CorrelationId) -> StoreError {
    StoreError::NotFound {
        entity: "execution",
        key: correlation_id.to_string(),
    }
}

fn missing_node_execution(execution_id: ExecutionId, node_id: &NodeId) -> StoreError {
    StoreError::NotFound {
        entity: "node execution",
        key: format!("{execution_id}/{node_id}"),
    }
}

impl State {
    fn node_execution_mut(
        &mut self,
        execution_id: ExecutionId,
        node_id: &NodeId,
    ) -> Result<&mut NodeExecution, StoreError> {
        self.node_executions
            .iter_mut()
            .find(|n| n.execution_id == execution_id && &n.node_id == node_id)
            .ok_or_else(|| missing_node_execution(execution_id, node_id))
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn load_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.lock()?.workflows.get(&id).cloned())
    }

    async fn cron_triggers(&self) -> Result<Vec<CronTriggerNode>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .workflows
            .values()
            .flat_map(|w| {
                w.nodes
                    .iter()
                    .filter(|n| n.node_type == NodeType::CronTrigger)
                    .map(move |n| CronTriggerNode {
                        workflow_id: w.id,
                        node_id: n.id.clone(),
                        data: n.data.clone(),
                    })
            })
            .collect())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(&self, new: NewExecution) -> Result<Execution, StoreError> {
        let mut state = self.lock()?;
        Ok(state
            .executions
            .entry(new.correlation_id)
            .or_insert_with(|| Execution::start(new))
            .clone())
    }

    async fn complete_execution(
        &self,
        correlation_id: CorrelationId,
        output: JsonValue,
    ) -> Result<Execution, StoreError> {
        let mut state = self.lock()?;
        let execution = state
            .executions
            .get_mut(&correlation_id)
            .ok_or_else(|| missing_execution(correlation_id))?;
        execution.complete(output)?;
        Ok(execution.clone())
    }

    async fn fail_execution(
        &self,
        correlation_id: CorrelationId,
        error: String,
        error_stack: Option<String>,
    ) -> Result<Execution, StoreError> {
        let mut state = self.lock()?;
        let execution = state
            .executions
            .get_mut(&correlation_id)
            .ok_or_else(|| missing_execution(correlation_id))?;
        execution.fail(error, error_stack)?;
        Ok(execution.clone())
    }

    async fn execution(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<Execution>, StoreError> {
        Ok(self.lock()?.executions.get(&correlation_id).cloned())
    }

    async fn start_node_execution(
        &self,
        new: NewNodeExecution,
    ) -> Result<NodeExecution, StoreError> {
        let mut state = self.lock()?;
        if let Ok(existing) = state.node_execution_mut(new.execution_id, &new.node_id) {
            return Ok(existing.clone());
        }
        let record = NodeExecution::start(new);
        state.node_executions.push(record.clone());
        Ok(record)
    }

    async fn complete_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        output: JsonValue,
    ) -> Result<NodeExecution, StoreError> {
        let mut state = self.lock()?;
        let record = state.node_execution_mut(execution_id, node_id)?;
        record.complete(output)?;
        Ok(record.clone())
    }

    async fn fail_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        error: String,
    ) -> Result<NodeExecution, StoreError> {
        let mut state = self.lock()?;
        let record = state.node_execution_mut(execution_id, node_id)?;
        record.fail(error)?;
        Ok(record.clone())
    }

    async fn node_executions(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<NodeExecution>, StoreError> {
        Ok(self
            .lock()?
            .node_executions
            .iter()
            .filter(|n| n.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<ExecutionPage, StoreError> {
        let state = self.lock()?;
        let mut matching: Vec<&Execution> = state
            .executions
            .values()
            .filter(|e| query.workflow_id.is_none_or(|id| e.workflow_id == id))
            .collect();
        matching.sort_by(|a, b| (b.started_at, b.id).cmp(&(a.started_at, a.id)));

        let total_count = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.page_size as usize)
            .cloned()
            .collect();
        Ok(ExecutionPage::new(items, query, total_count))
    }
}
