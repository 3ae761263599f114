//! Handing run requests to the engine.

use crate::orchestrator::Engine;
use crate::trigger::RunRequest;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Error from a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub message: String,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run dispatch failed: {}", self.message)
    }
}

impl std::error::Error for DispatchError {}

/// Accepts run requests from trigger surfaces.
#[async_trait]
pub trait RunDispatcher: Send + Sync {
    async fn dispatch(&self, request: RunRequest) -> Result<(), DispatchError>;

    /// Dispatches each request in order, stopping at the first failure.
    async fn dispatch_batch(&self, requests: Vec<RunRequest>) -> Result<(), DispatchError> {
        for request in requests {
            self.dispatch(request).await?;
        }
        Ok(())
    }
}

/// Runs requests on the local tokio runtime.
pub struct InlineDispatcher {
    engine: Arc<Engine>,
    permits: Arc<Semaphore>,
}

impl InlineDispatcher {
    /// At most `max_concurrent_runs` runs execute at once; zero is treated
    /// as one.
    #[must_use]
    pub fn new(engine: Arc<Engine>, max_concurrent_runs: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }
}

#[async_trait]
impl RunDispatcher for InlineDispatcher {
    async fn dispatch(&self, request: RunRequest) -> Result<(), DispatchError> {
        let engine = self.engine.clone();
        let permits = self.permits.clone();
        debug!(correlation_id = ?request.correlation_id, "spawning run");
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!("run semaphore closed, dropping request");
                return;
            };
            // The engine logs and records failures itself.
            let _ = engine.start_run(request).await;
        });
        Ok(())
    }
}

/// Dispatcher that keeps requests in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingDispatcher {
    requests: Arc<Mutex<Vec<RunRequest>>>,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl RecordingDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Sizes of the batches received, in order.
    #[must_use]
    pub fn batches(&self) -> Vec<usize> {
        self.batches
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    fn record(&self, requests: Vec<RunRequest>) -> Result<(), DispatchError> {
        let mut stored = self.requests.lock().map_err(|e| DispatchError {
            message: e.to_string(),
        })?;
        stored.extend(requests);
        Ok(())
    }
}

#[async_trait]
impl RunDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: RunRequest) -> Result<(), DispatchError> {
        self.record(vec![request])
    }

    async fn dispatch_batch(&self, requests: Vec<RunRequest>) -> Result<(), DispatchError> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(requests.len());
        }
        self.record(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::credential::{InMemoryCredentialStore, PlaintextCipher};
    use crate::definition::Workflow;
    use crate::execution::ExecutionStatus;
    use crate::executor::{ConditionExecutor, ExecutorRegistry, HttpRequestExecutor};
    use crate::memory::InMemoryStore;
    use crate::node::{Node, NodeType};
    use crate::status::{StatusHandle, TracingStatusPublisher};
    use crate::step::{InMemoryStepRunnerFactory, RetryPolicy};
    use crate::store::ExecutionStore;
    use crate::template::TemplateEngine;
    use flowforge_core::{UserId, WorkflowId};
    use serde_json::json;
    use std::time::Duration;

    fn engine(store: &InMemoryStore) -> Arc<Engine> {
        let templates = Arc::new(TemplateEngine::new());
        let registry = ExecutorRegistry::new(
            ConditionExecutor::new(templates.clone()),
            HttpRequestExecutor::new(
                templates,
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(PlaintextCipher),
                Duration::from_secs(1),
            )
            .expect("client"),
        );
        Arc::new(Engine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            registry,
            Arc::new(InMemoryStepRunnerFactory::new(RetryPolicy::none())),
            StatusHandle::new(Arc::new(TracingStatusPublisher)),
        ))
    }

    #[tokio::test]
    async fn inline_dispatch_runs_in_background() {
        let store = InMemoryStore::new();
        let workflow = Workflow::new(UserId::new(), "inline")
            .with_node(Node::new("start", "Start", NodeType::ManualTrigger))
            .with_node(
                Node::new("check", "Check", NodeType::Condition).with_data(json!({
                    "variableName": "ok",
                    "leftOperand": "x",
                    "operator": "is_not_empty",
                })),
            )
            .with_connection(Connection::new("start", "check"));
        let workflow_id = workflow.id;
        store.put_workflow(workflow).expect("put");

        let dispatcher = InlineDispatcher::new(engine(&store), 2);
        let request = RunRequest::new(workflow_id, json!({}));
        let correlation_id = request.correlation_id.expect("id");
        dispatcher.dispatch(request).await.expect("dispatch");

        let mut status = None;
        for _ in 0..100 {
            status = store
                .execution(correlation_id)
                .await
                .expect("lookup")
                .map(|e| e.status);
            if status.is_some_and(|s| s.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, Some(ExecutionStatus::Success));
    }

    #[tokio::test]
    async fn recording_dispatcher_tracks_batches() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher
            .dispatch_batch(vec![
                RunRequest::new(WorkflowId::new(), json!({})),
                RunRequest::new(WorkflowId::new(), json!({})),
            ])
            .await
            .expect("batch");
        dispatcher
            .dispatch(RunRequest::new(WorkflowId::new(), json!({})))
            .await
            .expect("single");

        assert_eq!(dispatcher.requests().len(), 3);
        assert_eq!(dispatcher.batches(), vec![2]);
    }
}
