use super::{ConditionExecutor, HttpRequestExecutor, NodeExecutor, TriggerExecutor};
use crate::node::NodeType;
use std::sync::Arc;

/// One executor per node type, resolved by exhaustive match.
#[derive(Clone)]
pub struct ExecutorRegistry {
    manual: Arc<dyn NodeExecutor>,
    webhook: Arc<dyn NodeExecutor>,
    cron: Arc<dyn NodeExecutor>,
    condition: Arc<dyn NodeExecutor>,
    http_request: Arc<dyn NodeExecutor>,
    // INITIAL shares the manual executor unless overridden.
    initial: Arc<dyn NodeExecutor>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new(condition: ConditionExecutor, http_request: HttpRequestExecutor) -> Self {
        let manual: Arc<dyn NodeExecutor> = Arc::new(TriggerExecutor::manual());
        Self {
            initial: manual.clone(),
            manual,
            webhook: Arc::new(TriggerExecutor::webhook()),
            cron: Arc::new(TriggerExecutor::cron()),
            condition: Arc::new(condition),
            http_request: Arc::new(http_request),
        }
    }

    /// The executor for `node_type`.
    #[must_use]
    pub fn get(&self, node_type: NodeType) -> &Arc<dyn NodeExecutor> {
        match node_type {
            NodeType::Initial => &self.initial,
            NodeType::ManualTrigger => &self.manual,
            NodeType::Webhook => &self.webhook,
            NodeType::CronTrigger => &self.cron,
            NodeType::Condition => &self.condition,
            NodeType::HttpRequest => &self.http_request,
        }
    }

    /// Replaces the executor for one node type.
    #[must_use]
    pub fn with_override(mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) -> Self {
        let slot = match node_type {
            NodeType::Initial => &mut self.initial,
            NodeType::ManualTrigger => &mut self.manual,
            NodeType::Webhook => &mut self.webhook,
            NodeType::CronTrigger => &mut self.cron,
            NodeType::Condition => &mut self.condition,
            NodeType::HttpRequest => &mut self.http_request,
        };
        *slot = executor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{InMemoryCredentialStore, PlaintextCipher};
    use crate::executor::http_request::DEFAULT_TIMEOUT;
    use crate::template::TemplateEngine;

    fn registry() -> ExecutorRegistry {
        let templates = Arc::new(TemplateEngine::new());
        ExecutorRegistry::new(
            ConditionExecutor::new(templates.clone()),
            HttpRequestExecutor::new(
                templates,
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(PlaintextCipher),
                DEFAULT_TIMEOUT,
            )
            .expect("client"),
        )
    }

    #[test]
    fn every_node_type_has_an_executor() {
        let registry = registry();
        let channels: Vec<&str> = NodeType::ALL
            .iter()
            .map(|t| registry.get(*t).channel())
            .collect();
        assert_eq!(
            channels,
            vec![
                "manual-trigger-execution",
                "manual-trigger-execution",
                "webhook-trigger-execution",
                "cron-trigger-execution",
                "condition-execution",
                "http-request-execution",
            ]
        );
    }

    #[test]
    fn override_replaces_only_one_slot() {
        let registry = registry().with_override(NodeType::Initial, Arc::new(TriggerExecutor::cron()));
        assert_eq!(registry.get(NodeType::Initial).channel(), "cron-trigger-execution");
        assert_eq!(registry.get(NodeType::ManualTrigger).channel(), "manual-trigger-execution");
    }
}
