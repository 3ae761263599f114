//! Workflow engine for flowforge.
//!
//! This crate provides the execution engine, including:
//!
//! - **Graph Model**: Nodes, port-qualified connections and topological ordering via petgraph
//! - **Executors**: Trigger, condition and HTTP request node behavior behind one trait
//! - **Durable Steps**: Named, memoized side effects with retry
//! - **Orchestration**: Branch-aware traversal that records Execution state
//! - **Dispatch**: Inline and NATS JetStream run queues

pub mod adjacency;
pub mod condition;
pub mod connection;
pub mod context;
pub mod credential;
pub mod definition;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod executor;
pub mod graph;
pub mod memory;
pub mod nats;
pub mod node;
pub mod orchestrator;
pub mod status;
pub mod step;
pub mod store;
pub mod template;
pub mod trigger;

pub use adjacency::AdjacencyIndex;
pub use connection::Connection;
pub use context::{BranchResult, RunContext};
pub use definition::Workflow;
pub use dispatch::{DispatchError, InlineDispatcher, RunDispatcher};
pub use error::{ExecutionError, GraphError, StoreError, WorkflowError};
pub use execution::{Execution, ExecutionStatus, NodeExecution};
pub use executor::{ExecutorRegistry, NodeExecutor};
pub use graph::topological_sort;
pub use memory::InMemoryStore;
pub use node::{Node, NodeId, NodeType};
pub use orchestrator::{Engine, RunOutcome};
pub use status::{StatusHandle, StatusPublisher};
pub use step::{RetryPolicy, StepRunner, StepRunnerFactory};
pub use store::{CronTriggerNode, ExecutionPage, ExecutionQuery, ExecutionStore, WorkflowStore};
pub use trigger::{RunRequest, TriggerKind};
