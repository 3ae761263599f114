use super::{ExecutorInput, NodeExecutor, with_status};
use crate::context::RunContext;
use crate::error::ExecutionError;
use async_trait::async_trait;

/// Pass-through executor for trigger nodes.
///
/// Trigger data is already in the context when the run starts, so these
/// only report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerExecutor {
    channel: &'static str,
}

impl TriggerExecutor {
    /// Used for both `MANUAL_TRIGGER` and `INITIAL` nodes.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            channel: "manual-trigger-execution",
        }
    }

    #[must_use]
    pub fn webhook() -> Self {
        Self {
            channel: "webhook-trigger-execution",
        }
    }

    #[must_use]
    pub fn cron() -> Self {
        Self {
            channel: "cron-trigger-execution",
        }
    }
}

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    fn channel(&self) -> &'static str {
        self.channel
    }

    async fn execute(&self, input: ExecutorInput<'_>) -> Result<RunContext, ExecutionError> {
        let ExecutorInput {
            node,
            context,
            status,
            ..
        } = input;
        with_status(status, self.channel, &node.id, async move { Ok(context) }).await
    }
}
