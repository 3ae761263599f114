use super::{ExecutorInput, NodeExecutor, required, with_status};
use crate::condition::Operator;
use crate::context::{BranchResult, RunContext};
use crate::error::ExecutionError;
use crate::node::Node;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Evaluates `leftOperand <operator> rightOperand` and selects a branch.
pub struct ConditionExecutor {
    templates: Arc<TemplateEngine>,
}

impl ConditionExecutor {
    #[must_use]
    pub fn new(templates: Arc<TemplateEngine>) -> Self {
        Self { templates }
    }

    fn evaluate(&self, node: &Node, context: RunContext) -> Result<RunContext, ExecutionError> {
        let variable = required(node, "variableName")?;
        let left = required(node, "leftOperand")?;
        let operator: Operator =
            required(node, "operator")?
                .parse()
                .map_err(|e| ExecutionError::InvalidConfig {
                    node_id: node.id.clone(),
                    reason: format!("{e}"),
                })?;

        let left = self.templates.render(&node.id, left, &context)?;
        let right = node
            .data_str("rightOperand")
            .map(|r| self.templates.render(&node.id, r, &context))
            .transpose()?;

        let result = operator.evaluate(&left, right.as_deref());
        debug!(node_id = %node.id, %operator, result, "condition evaluated");

        Ok(context
            .with_variable(variable, json!({ "result": result }))
            .with_control(BranchResult(result)))
    }
}

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn channel(&self) -> &'static str {
        "condition-execution"
    }

    async fn execute(&self, input: ExecutorInput<'_>) -> Result<RunContext, ExecutionError> {
        let ExecutorInput {
            node,
            context,
            status,
            ..
        } = input;
        with_status(status, self.channel(), &node.id, async move {
            self.evaluate(node, context)
        })
        .await
    }
}
