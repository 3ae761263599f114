//! Live node status publishing.
//!
//! Publishing is fire-and-forget: the engine goes through [`StatusHandle`],
//! which logs delivery failures instead of returning them.

use crate::node::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Topic every status event is published under.
pub const STATUS_TOPIC: &str = "status";

/// Lifecycle status of a node as shown to live subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Loading,
    Success,
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// Payload of a status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub node_id: NodeId,
    pub status: NodeStatus,
}

/// Error from a status transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError {
    pub message: String,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status publish failed: {}", self.message)
    }
}

impl std::error::Error for PublishError {}

/// Transport for status events.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(
        &self,
        channel: &str,
        topic: &str,
        event: &StatusEvent,
    ) -> Result<(), PublishError>;
}

/// The engine-side handle to a [`StatusPublisher`].
#[derive(Clone)]
pub struct StatusHandle {
    publisher: Arc<dyn StatusPublisher>,
}

impl StatusHandle {
    #[must_use]
    pub fn new(publisher: Arc<dyn StatusPublisher>) -> Self {
        Self { publisher }
    }

    /// Publishes `status` for `node_id` on `channel`. Never fails.
    pub async fn publish(&self, channel: &str, node_id: &NodeId, status: NodeStatus) {
        let event = StatusEvent {
            node_id: node_id.clone(),
            status,
        };
        if let Err(e) = self.publisher.publish(channel, STATUS_TOPIC, &event).await {
            warn!(channel, node_id = %node_id, %status, error = %e, "dropping status event");
        }
    }
}

/// Publisher that only logs; used when no message bus is configured.
#[derive(Debug, Default)]
pub struct TracingStatusPublisher;

#[async_trait]
impl StatusPublisher for TracingStatusPublisher {
    async fn publish(
        &self,
        channel: &str,
        topic: &str,
        event: &StatusEvent,
    ) -> Result<(), PublishError> {
        debug!(channel, topic, node_id = %event.node_id, status = %event.status, "node status");
        Ok(())
    }
}

/// Publisher that keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingStatusPublisher {
    events: Arc<Mutex<Vec<(String, StatusEvent)>>>,
}

impl RecordingStatusPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(channel, event)` pairs in publish order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, StatusEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Statuses published for one node, in order.
    #[must_use]
    pub fn statuses_for(&self, node_id: &str) -> Vec<NodeStatus> {
        self.events()
            .into_iter()
            .filter(|(_, e)| e.node_id.as_str() == node_id)
            .map(|(_, e)| e.status)
            .collect()
    }
}

#[async_trait]
impl StatusPublisher for RecordingStatusPublisher {
    async fn publish(
        &self,
        channel: &str,
        _topic: &str,
        event: &StatusEvent,
    ) -> Result<(), PublishError> {
        let mut events = self.events.lock().map_err(|e| PublishError {
            message: e.to_string(),
        })?;
        events.push((channel.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingPublisher;

    #[async_trait]
    impl StatusPublisher for FailingPublisher {
        async fn publish(
            &self,
            _channel: &str,
            _topic: &str,
            _event: &StatusEvent,
        ) -> Result<(), PublishError> {
            Err(PublishError {
                message: "no route to broker".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let handle = StatusHandle::new(Arc::new(FailingPublisher));
        handle
            .publish("condition-execution", &NodeId::from("c"), NodeStatus::Loading)
            .await;
    }

    #[tokio::test]
    async fn recorder_keeps_order_and_channel() {
        let recorder = RecordingStatusPublisher::new();
        let handle = StatusHandle::new(Arc::new(recorder.clone()));
        let id = NodeId::from("n1");
        handle.publish("http-request-execution", &id, NodeStatus::Loading).await;
        handle.publish("http-request-execution", &id, NodeStatus::Success).await;

        assert_eq!(
            recorder.statuses_for("n1"),
            vec![NodeStatus::Loading, NodeStatus::Success]
        );
        assert_eq!(recorder.events()[0].0, "http-request-execution");
    }

    #[test]
    fn payload_shape() {
        let event = StatusEvent {
            node_id: NodeId::from("n1"),
            status: NodeStatus::Error,
        };
        assert_eq!(
            serde_json::to_value(&event).expect("serialize"),
            json!({ "nodeId": "n1", "status": "error" })
        );
    }
}
