//! Run orchestration.
//!
//! The engine drives one run end to end:
//! 1. Record the Execution under the request's correlation id
//! 2. Load and order the workflow
//! 3. Walk nodes in topological order, running activated ones
//! 4. Propagate activation along output ports
//! 5. Finalize the Execution
//!
//! Every persistence write is a named durable step, so delivering the same
//! request twice replays completed work instead of repeating it.

use crate::adjacency::AdjacencyIndex;
use crate::connection::Connection;
use crate::context::RunContext;
use crate::error::{ExecutionError, GraphError, StoreError, WorkflowError};
use crate::execution::{Execution, ExecutionStatus, NewExecution, NewNodeExecution};
use crate::executor::{ExecutorInput, ExecutorRegistry, RunMetadata};
use crate::graph::topological_sort;
use crate::node::{Node, NodeId};
use crate::status::StatusHandle;
use crate::step::{StepRunner, StepRunnerFactory, run_typed};
use crate::store::{ExecutionStore, WorkflowStore};
use crate::trigger::{RunRequest, TriggerKind};
use flowforge_core::{CorrelationId, ExecutionId, UserId, WorkflowId};
use futures::FutureExt;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Span, debug, error, info, instrument, warn};

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub correlation_id: CorrelationId,
    pub execution_id: ExecutionId,
    /// Final context variables.
    pub output: JsonValue,
    /// Nodes that ran, in execution order.
    pub executed: Vec<NodeId>,
}

/// The deterministic facts a run needs about its workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreparedWorkflow {
    /// Topologically sorted.
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Preparation {
    Ready(PreparedWorkflow),
    NotFound,
    Invalid { error: GraphError },
}

/// Activation bookkeeping for one traversal.
#[derive(Debug, Default)]
struct Activation {
    activated: HashSet<NodeId>,
    suppressed: HashSet<NodeId>,
}

impl Activation {
    /// Roots activate, restricted to roots of `trigger` when one is given.
    fn seed(index: &AdjacencyIndex, nodes: &[Node], trigger: Option<TriggerKind>) -> Self {
        let activated = index
            .roots(nodes)
            .filter(|n| trigger.is_none_or(|kind| n.node_type.trigger_kind() == Some(kind)))
            .map(|n| n.id.clone())
            .collect();
        Self {
            activated,
            suppressed: HashSet::new(),
        }
    }

    fn is_activated(&self, node_id: &NodeId) -> bool {
        self.activated.contains(node_id)
    }

    fn activate<'a>(&mut self, targets: impl IntoIterator<Item = &'a NodeId>) {
        for target in targets {
            if !self.suppressed.contains(target) {
                self.activated.insert(target.clone());
            }
        }
    }

    fn suppress<'a>(&mut self, targets: impl IntoIterator<Item = &'a NodeId>) {
        for target in targets {
            if !self.activated.contains(target) {
                self.suppressed.insert(target.clone());
            }
        }
    }
}

/// Identifiers shared by every step of a run.
#[derive(Debug, Clone, Copy)]
struct RunIds {
    correlation_id: CorrelationId,
    workflow_id: WorkflowId,
    execution_id: ExecutionId,
}

/// Executes workflow runs.
pub struct Engine {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    registry: ExecutorRegistry,
    steps: Arc<dyn StepRunnerFactory>,
    status: StatusHandle,
}

impl Engine {
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        registry: ExecutorRegistry,
        steps: Arc<dyn StepRunnerFactory>,
        status: StatusHandle,
    ) -> Self {
        Self {
            workflows,
            executions,
            registry,
            steps,
            status,
        }
    }

    /// Runs the workflow named by `request` to completion.
    ///
    /// # Errors
    ///
    /// Requests without a correlation id or workflow id are rejected before
    /// anything is recorded. Every later failure marks the Execution
    /// `FAILED` before it is returned.
    #[instrument(
        skip(self, request),
        fields(
            correlation_id = tracing::field::Empty,
            workflow_id = tracing::field::Empty
        )
    )]
    pub async fn start_run(&self, request: RunRequest) -> Result<RunOutcome, Report<WorkflowError>> {
        let correlation_id = request
            .correlation_id
            .ok_or(WorkflowError::MissingCorrelationId)?;
        let workflow_id = request.workflow_id.ok_or(WorkflowError::MissingWorkflowId)?;
        let span = Span::current();
        span.record("correlation_id", tracing::field::display(correlation_id));
        span.record("workflow_id", tracing::field::display(workflow_id));

        let steps = self.steps.for_run(correlation_id);
        let execution = self
            .create_execution(steps.as_ref(), correlation_id, workflow_id, request.trigger)
            .await?;
        info!(execution_id = %execution.id, trigger = ?request.trigger, "run started");

        let ids = RunIds {
            correlation_id,
            workflow_id,
            execution_id: execution.id,
        };
        match self.drive(steps.as_ref(), ids, &request).await {
            Ok(outcome) => {
                info!(nodes = outcome.executed.len(), "run succeeded");
                Ok(outcome)
            }
            Err(e) => {
                let message = e.to_string();
                let report = Report::from(e);
                error!(error = %message, "run failed");
                self.record_failure(correlation_id, message, format!("{report:?}"))
                    .await;
                Err(report)
            }
        }
    }

    async fn create_execution(
        &self,
        steps: &dyn StepRunner,
        correlation_id: CorrelationId,
        workflow_id: WorkflowId,
        trigger: Option<TriggerKind>,
    ) -> Result<Execution, WorkflowError> {
        let executions = &self.executions;
        let step = move || {
            async move {
                let execution = executions
                    .create_execution(NewExecution {
                        correlation_id,
                        workflow_id,
                        trigger,
                    })
                    .await?;
                Ok::<_, ExecutionError>(serde_json::to_value(execution)?)
            }
            .boxed()
        };
        run_typed(steps, "create-execution", &step)
            .await
            .map_err(persistence(correlation_id))
    }

    async fn drive(
        &self,
        steps: &dyn StepRunner,
        ids: RunIds,
        request: &RunRequest,
    ) -> Result<RunOutcome, WorkflowError> {
        let prepared = self.prepare(steps, ids).await?;
        let index = AdjacencyIndex::build(&prepared.connections);
        let mut activation = Activation::seed(&index, &prepared.nodes, request.trigger);
        let mut context = RunContext::from_initial(request.initial_data.clone());
        let mut executed = Vec::new();

        for node in &prepared.nodes {
            if !activation.is_activated(&node.id) {
                debug!(node_id = %node.id, "node not activated, skipping");
                continue;
            }

            context = self
                .run_node(steps, ids, prepared.user_id, node, context)
                .await?;
            executed.push(node.id.clone());

            if node.node_type.is_branching() {
                let branch = context
                    .take_control()
                    .ok_or_else(|| WorkflowError::MissingBranchResult {
                        node_id: node.id.clone(),
                    })?;
                debug!(node_id = %node.id, port = branch.port(), "branch selected");
                activation.activate(index.targets(&node.id, branch.port()));
                activation.suppress(index.targets_except(&node.id, branch.port()));
            } else {
                activation.activate(index.all_targets(&node.id));
            }
        }

        let output = context.snapshot();
        self.finalize(steps, ids.correlation_id, &output).await?;

        Ok(RunOutcome {
            correlation_id: ids.correlation_id,
            execution_id: ids.execution_id,
            output,
            executed,
        })
    }

    async fn prepare(
        &self,
        steps: &dyn StepRunner,
        ids: RunIds,
    ) -> Result<PreparedWorkflow, WorkflowError> {
        let workflows = &self.workflows;
        let workflow_id = ids.workflow_id;
        let step = move || {
            async move {
                let preparation = match workflows.load_workflow(workflow_id).await? {
                    None => Preparation::NotFound,
                    Some(workflow) => match topological_sort(&workflow.nodes, &workflow.connections)
                    {
                        Ok(nodes) => Preparation::Ready(PreparedWorkflow {
                            nodes,
                            connections: workflow.connections,
                            user_id: workflow.user_id,
                        }),
                        Err(error) => Preparation::Invalid { error },
                    },
                };
                Ok::<_, ExecutionError>(serde_json::to_value(preparation)?)
            }
            .boxed()
        };

        let preparation: Preparation = run_typed(steps, "prepare-workflow", &step)
            .await
            .map_err(persistence(ids.correlation_id))?;
        match preparation {
            Preparation::Ready(prepared) => Ok(prepared),
            Preparation::NotFound => Err(WorkflowError::NotFound { workflow_id }),
            Preparation::Invalid { error } => Err(error.into()),
        }
    }

    #[instrument(skip_all, fields(node_id = %node.id, node_type = %node.node_type))]
    async fn run_node(
        &self,
        steps: &dyn StepRunner,
        ids: RunIds,
        user_id: UserId,
        node: &Node,
        context: RunContext,
    ) -> Result<RunContext, WorkflowError> {
        let executions = &self.executions;
        let node_id = &node.id;

        let new = NewNodeExecution {
            execution_id: ids.execution_id,
            node_id: node_id.clone(),
            node_name: node.name.clone(),
            node_type: node.node_type,
            input: context.snapshot(),
        };
        let new = &new;
        let start = move || {
            async move {
                let record = executions.start_node_execution(new.clone()).await?;
                Ok::<_, ExecutionError>(serde_json::to_value(record)?)
            }
            .boxed()
        };
        steps
            .run_step(&format!("node-start:{node_id}"), &start)
            .await
            .map_err(persistence(ids.correlation_id))?;

        let executor = self.registry.get(node.node_type);
        let result = executor
            .execute(ExecutorInput {
                node,
                context,
                meta: RunMetadata {
                    user_id,
                    workflow_id: ids.workflow_id,
                    node_id: node_id.clone(),
                    correlation_id: ids.correlation_id,
                },
                steps,
                status: &self.status,
            })
            .await;

        match result {
            Ok(output) => {
                let snapshot = output.snapshot();
                let snapshot = &snapshot;
                let complete = move || {
                    async move {
                        let record = executions
                            .complete_node_execution(ids.execution_id, node_id, snapshot.clone())
                            .await?;
                        Ok::<_, ExecutionError>(serde_json::to_value(record)?)
                    }
                    .boxed()
                };
                steps
                    .run_step(&format!("node-complete:{node_id}"), &complete)
                    .await
                    .map_err(persistence(ids.correlation_id))?;
                Ok(output)
            }
            Err(source) => {
                warn!(error = %source, "node failed");
                let message = source.to_string();
                let message = &message;
                let fail = move || {
                    async move {
                        let record = executions
                            .fail_node_execution(ids.execution_id, node_id, message.clone())
                            .await?;
                        Ok::<_, ExecutionError>(serde_json::to_value(record)?)
                    }
                    .boxed()
                };
                if let Err(e) = steps.run_step(&format!("node-fail:{node_id}"), &fail).await {
                    warn!(error = %e, "could not record node failure");
                }
                Err(WorkflowError::NodeFailed {
                    node_id: node_id.clone(),
                    source,
                })
            }
        }
    }

    async fn finalize(
        &self,
        steps: &dyn StepRunner,
        correlation_id: CorrelationId,
        output: &JsonValue,
    ) -> Result<(), WorkflowError> {
        let executions = &self.executions;
        let step = move || {
            async move {
                // A rejected transition still reports the stored record so the
                // caller sees which terminal state won.
                let execution = match executions
                    .complete_execution(correlation_id, output.clone())
                    .await
                {
                    Ok(execution) => execution,
                    Err(StoreError::InvalidStateTransition { .. }) => executions
                        .execution(correlation_id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound {
                            entity: "execution",
                            key: correlation_id.to_string(),
                        })?,
                    Err(e) => return Err(e.into()),
                };
                Ok::<_, ExecutionError>(serde_json::to_value(execution)?)
            }
            .boxed()
        };

        let execution: Execution = run_typed(steps, "update-execution", &step)
            .await
            .map_err(persistence(correlation_id))?;
        if execution.status == ExecutionStatus::Success {
            Ok(())
        } else {
            Err(WorkflowError::InvalidStateTransition {
                from: execution.status.to_string(),
                to: ExecutionStatus::Success.to_string(),
            })
        }
    }

    async fn record_failure(&self, correlation_id: CorrelationId, message: String, stack: String) {
        if let Err(e) = self
            .executions
            .fail_execution(correlation_id, message, Some(stack))
            .await
        {
            warn!(error = %e, "could not mark execution failed");
        }
    }
}

fn persistence(correlation_id: CorrelationId) -> impl Fn(ExecutionError) -> WorkflowError {
    move |e| WorkflowError::Persistence {
        correlation_id,
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{FALSE_PORT, TRUE_PORT};
    use crate::credential::{InMemoryCredentialStore, PlaintextCipher};
    use crate::definition::Workflow;
    use crate::executor::{
        ConditionExecutor, HttpRequestExecutor, NodeExecutor, with_status,
    };
    use crate::memory::InMemoryStore;
    use crate::node::NodeType;
    use crate::status::{NodeStatus, RecordingStatusPublisher};
    use crate::step::{InMemoryStepRunnerFactory, RetryPolicy};
    use crate::template::TemplateEngine;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Action executor that records calls and writes `{ seen: <node id> }`.
    #[derive(Default)]
    struct StubAction {
        calls: Mutex<Vec<NodeId>>,
        effects: AtomicU32,
        fail_on: Option<&'static str>,
    }

    impl StubAction {
        fn failing_on(node_id: &'static str) -> Self {
            Self {
                fail_on: Some(node_id),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<NodeId> {
            self.calls.lock().expect("calls").clone()
        }
    }

    #[async_trait]
    impl NodeExecutor for StubAction {
        fn channel(&self) -> &'static str {
            "http-request-execution"
        }

        async fn execute(&self, input: ExecutorInput<'_>) -> Result<RunContext, ExecutionError> {
            let ExecutorInput {
                node,
                context,
                steps,
                status,
                ..
            } = input;
            with_status(status, self.channel(), &node.id, async move {
                self.calls.lock().expect("calls").push(node.id.clone());
                if self.fail_on == Some(node.id.as_str()) {
                    return Err(ExecutionError::MissingField {
                        node_id: node.id.clone(),
                        field: "endpoint".to_string(),
                    });
                }
                let effects = &self.effects;
                let seen = node.id.to_string();
                let seen = &seen;
                let step = move || {
                    async move {
                        effects.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ExecutionError>(json!({ "seen": seen }))
                    }
                    .boxed()
                };
                let value = steps
                    .run_step(&format!("{}:http-request", node.id), &step)
                    .await?;
                Ok(context.with_variable(node.id.as_str(), value))
            })
            .await
        }
    }

    struct Fixture {
        store: InMemoryStore,
        recorder: RecordingStatusPublisher,
        stub: Arc<StubAction>,
        engine: Engine,
    }

    fn fixture(stub: StubAction) -> Fixture {
        let store = InMemoryStore::new();
        let recorder = RecordingStatusPublisher::new();
        let stub = Arc::new(stub);
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
        )
        .with_override(NodeType::HttpRequest, stub.clone());
        let engine = Engine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            registry,
            Arc::new(InMemoryStepRunnerFactory::new(RetryPolicy::none())),
            StatusHandle::new(Arc::new(recorder.clone())),
        );
        Fixture {
            store,
            recorder,
            stub,
            engine,
        }
    }

    fn trigger(id: &str) -> Node {
        Node::new(id, id, NodeType::ManualTrigger)
    }

    fn action(id: &str) -> Node {
        Node::new(id, id, NodeType::HttpRequest)
    }

    fn condition(id: &str, left: &str, operator: &str, right: &str) -> Node {
        Node::new(id, id, NodeType::Condition).with_data(json!({
            "variableName": id,
            "leftOperand": left,
            "operator": operator,
            "rightOperand": right,
        }))
    }

    fn ids(values: &[&str]) -> Vec<NodeId> {
        values.iter().map(|v| NodeId::from(*v)).collect()
    }

    fn put(fixture: &Fixture, workflow: Workflow) -> WorkflowId {
        let id = workflow.id;
        fixture.store.put_workflow(workflow).expect("put");
        id
    }

    async fn execution(fixture: &Fixture, correlation_id: CorrelationId) -> Execution {
        fixture
            .store
            .execution(correlation_id)
            .await
            .expect("lookup")
            .expect("execution exists")
    }

    #[tokio::test]
    async fn linear_pipeline_runs_in_order_and_succeeds() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "linear")
                .with_node(action("b"))
                .with_node(action("a"))
                .with_node(trigger("start"))
                .with_connection(Connection::new("start", "a"))
                .with_connection(Connection::new("a", "b")),
        );
        let request = RunRequest::new(workflow_id, json!({ "orderId": 7 }));
        let correlation_id = request.correlation_id.expect("id");

        let outcome = fx.engine.start_run(request).await.expect("run");

        assert_eq!(outcome.executed, ids(&["start", "a", "b"]));
        assert_eq!(outcome.output["orderId"], json!(7));
        assert_eq!(outcome.output["b"], json!({ "seen": "b" }));

        let record = execution(&fx, correlation_id).await;
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.output, Some(outcome.output.clone()));

        let nodes = fx
            .store
            .node_executions(record.id)
            .await
            .expect("node executions");
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| n.status == ExecutionStatus::Success));
        assert_eq!(nodes[2].input["a"], json!({ "seen": "a" }));
    }

    fn branching_workflow() -> Workflow {
        Workflow::new(UserId::new(), "branch")
            .with_node(trigger("start"))
            .with_node(condition("big", "{{ amount }}", "greater_than", "10"))
            .with_node(action("notify"))
            .with_node(action("archive"))
            .with_connection(Connection::new("start", "big"))
            .with_connection(Connection::from_port("big", TRUE_PORT, "notify"))
            .with_connection(Connection::from_port("big", FALSE_PORT, "archive"))
    }

    async fn recorded_nodes(fx: &Fixture, correlation_id: CorrelationId) -> Vec<NodeId> {
        let record = execution(fx, correlation_id).await;
        fx.store
            .node_executions(record.id)
            .await
            .expect("node executions")
            .into_iter()
            .map(|n| n.node_id)
            .collect()
    }

    #[tokio::test]
    async fn false_condition_runs_only_false_branch() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(&fx, branching_workflow());
        let request = RunRequest::new(workflow_id, json!({ "amount": 5 }));
        let correlation_id = request.correlation_id.expect("id");

        let outcome = fx.engine.start_run(request).await.expect("run");

        assert_eq!(outcome.executed, ids(&["start", "big", "archive"]));
        assert_eq!(outcome.output["big"], json!({ "result": false }));
        assert_eq!(fx.stub.calls(), ids(&["archive"]));
        assert!(fx.recorder.statuses_for("notify").is_empty());
        assert_eq!(
            recorded_nodes(&fx, correlation_id).await,
            ids(&["start", "big", "archive"])
        );
    }

    #[tokio::test]
    async fn true_condition_runs_only_true_branch() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(&fx, branching_workflow());
        let request = RunRequest::new(workflow_id, json!({ "amount": 50 }));
        let correlation_id = request.correlation_id.expect("id");

        let outcome = fx.engine.start_run(request).await.expect("run");

        assert_eq!(outcome.executed, ids(&["start", "big", "notify"]));
        assert_eq!(outcome.output["big"], json!({ "result": true }));
        assert_eq!(fx.stub.calls(), ids(&["notify"]));
        assert!(fx.recorder.statuses_for("archive").is_empty());
        assert_eq!(
            recorded_nodes(&fx, correlation_id).await,
            ids(&["start", "big", "notify"])
        );
    }

    #[tokio::test]
    async fn node_failure_aborts_and_marks_execution_failed() {
        let fx = fixture(StubAction::failing_on("a"));
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "failing")
                .with_node(trigger("start"))
                .with_node(action("a"))
                .with_node(action("b"))
                .with_connection(Connection::new("start", "a"))
                .with_connection(Connection::new("a", "b")),
        );
        let request = RunRequest::new(workflow_id, json!({}));
        let correlation_id = request.correlation_id.expect("id");

        let err = fx.engine.start_run(request).await.expect_err("failure");
        assert!(err.to_string().contains("required field 'endpoint'"));

        let record = execution(&fx, correlation_id).await;
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("node a: required field 'endpoint' is missing")
        );
        assert!(record.error_stack.is_some());

        let nodes = fx.store.node_executions(record.id).await.expect("nodes");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].status, ExecutionStatus::Failed);
        assert_eq!(fx.stub.calls(), ids(&["a"]));
        assert_eq!(
            fx.recorder.statuses_for("a"),
            vec![NodeStatus::Loading, NodeStatus::Error]
        );
    }

    #[tokio::test]
    async fn cycle_is_rejected_before_any_node_runs() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "cyclic")
                .with_node(trigger("start"))
                .with_node(action("a"))
                .with_node(action("b"))
                .with_connection(Connection::new("start", "a"))
                .with_connection(Connection::new("a", "b"))
                .with_connection(Connection::new("b", "a")),
        );
        let request = RunRequest::new(workflow_id, json!({}));
        let correlation_id = request.correlation_id.expect("id");

        let err = fx.engine.start_run(request).await.expect_err("cycle");
        assert!(err.to_string().contains("workflow contains a cycle"));

        let record = execution(&fx, correlation_id).await;
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(fx.stub.calls().is_empty());
        assert!(fx.recorder.events().is_empty());
        assert!(fx.store.node_executions(record.id).await.expect("nodes").is_empty());
    }

    #[tokio::test]
    async fn missing_workflow_fails_the_execution() {
        let fx = fixture(StubAction::default());
        let request = RunRequest::new(WorkflowId::new(), json!({}));
        let correlation_id = request.correlation_id.expect("id");

        let err = fx.engine.start_run(request).await.expect_err("not found");
        assert!(err.to_string().contains("workflow not found"));
        assert_eq!(execution(&fx, correlation_id).await.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn requests_without_ids_create_nothing() {
        let fx = fixture(StubAction::default());

        let mut no_correlation = RunRequest::new(WorkflowId::new(), json!({}));
        no_correlation.correlation_id = None;
        let err = fx.engine.start_run(no_correlation).await.expect_err("setup");
        assert!(err.to_string().contains("missing its correlation id"));

        let mut no_workflow = RunRequest::new(WorkflowId::new(), json!({}));
        no_workflow.workflow_id = None;
        let err = fx.engine.start_run(no_workflow).await.expect_err("setup");
        assert!(err.to_string().contains("missing its workflow id"));

        assert_eq!(fx.store.execution_count(), 0);
    }

    #[tokio::test]
    async fn fan_out_runs_every_target() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "fan-out")
                .with_node(trigger("start"))
                .with_node(action("a"))
                .with_node(action("b"))
                .with_connection(Connection::new("start", "a"))
                .with_connection(Connection::new("start", "b")),
        );

        let outcome = fx
            .engine
            .start_run(RunRequest::new(workflow_id, json!({})))
            .await
            .expect("run");

        let mut calls = fx.stub.calls();
        calls.sort_by(|l, r| l.as_str().cmp(r.as_str()));
        assert_eq!(calls, ids(&["a", "b"]));
        assert_eq!(outcome.executed.len(), 3);
    }

    #[tokio::test]
    async fn fan_in_target_runs_exactly_once() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "fan-in")
                .with_node(trigger("start"))
                .with_node(action("a"))
                .with_node(action("b"))
                .with_node(action("join"))
                .with_connection(Connection::new("start", "a"))
                .with_connection(Connection::new("start", "b"))
                .with_connection(Connection::new("a", "join"))
                .with_connection(Connection::new("b", "join")),
        );

        let outcome = fx
            .engine
            .start_run(RunRequest::new(workflow_id, json!({})))
            .await
            .expect("run");

        let joins = fx
            .stub
            .calls()
            .into_iter()
            .filter(|id| id.as_str() == "join")
            .count();
        assert_eq!(joins, 1);
        assert_eq!(outcome.executed.last(), Some(&NodeId::from("join")));
    }

    #[tokio::test]
    async fn suppressed_branch_stays_suppressed_when_reached_later() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "exclusive")
                .with_node(trigger("start"))
                .with_node(condition("check", "yes", "equals", "yes"))
                .with_node(action("taken"))
                .with_node(action("other"))
                .with_connection(Connection::new("start", "check"))
                .with_connection(Connection::from_port("check", TRUE_PORT, "taken"))
                .with_connection(Connection::from_port("check", FALSE_PORT, "other"))
                .with_connection(Connection::new("taken", "other")),
        );

        let outcome = fx
            .engine
            .start_run(RunRequest::new(workflow_id, json!({})))
            .await
            .expect("run");

        assert_eq!(outcome.executed, ids(&["start", "check", "taken"]));
    }

    #[tokio::test]
    async fn earlier_activation_wins_over_suppression() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "first-wins")
                .with_node(trigger("start"))
                .with_node(action("prep"))
                .with_node(condition("check", "yes", "equals", "yes"))
                .with_node(action("taken"))
                .with_node(action("shared"))
                .with_connection(Connection::new("start", "prep"))
                .with_connection(Connection::new("prep", "check"))
                .with_connection(Connection::new("prep", "shared"))
                .with_connection(Connection::from_port("check", TRUE_PORT, "taken"))
                .with_connection(Connection::from_port("check", FALSE_PORT, "shared")),
        );

        fx.engine
            .start_run(RunRequest::new(workflow_id, json!({})))
            .await
            .expect("run");

        let calls = fx.stub.calls();
        assert!(calls.contains(&NodeId::from("taken")));
        assert!(calls.contains(&NodeId::from("shared")));
    }

    #[tokio::test]
    async fn declared_trigger_activates_only_matching_roots() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "two-entry")
                .with_node(trigger("manual"))
                .with_node(Node::new("hook", "hook", NodeType::Webhook))
                .with_node(action("from-manual"))
                .with_node(action("from-hook"))
                .with_connection(Connection::new("manual", "from-manual"))
                .with_connection(Connection::new("hook", "from-hook")),
        );

        let outcome = fx
            .engine
            .start_run(
                RunRequest::new(workflow_id, json!({})).with_trigger(TriggerKind::Webhook),
            )
            .await
            .expect("run");

        assert_eq!(outcome.executed, ids(&["hook", "from-hook"]));
    }

    #[tokio::test]
    async fn without_connections_every_node_runs_in_stored_order() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "flat")
                .with_node(action("z"))
                .with_node(trigger("start"))
                .with_node(action("m")),
        );

        let outcome = fx
            .engine
            .start_run(RunRequest::new(workflow_id, json!({})))
            .await
            .expect("run");

        assert_eq!(outcome.executed, ids(&["z", "start", "m"]));
    }

    #[tokio::test]
    async fn redelivered_request_replays_completed_steps() {
        let fx = fixture(StubAction::default());
        let workflow_id = put(
            &fx,
            Workflow::new(UserId::new(), "replay")
                .with_node(trigger("start"))
                .with_node(action("a"))
                .with_connection(Connection::new("start", "a")),
        );
        let request = RunRequest::new(workflow_id, json!({}));

        let first = fx.engine.start_run(request.clone()).await.expect("first");
        let second = fx.engine.start_run(request).await.expect("second");

        assert_eq!(first.execution_id, second.execution_id);
        assert_eq!(first.output, second.output);
        assert_eq!(fx.stub.effects.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.execution_count(), 1);
    }
}
