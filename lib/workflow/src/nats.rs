//! NATS-backed collaborators for multi-process deployments.
//!
//! - `NatsStatusPublisher`: core NATS publish of node status events
//! - `NatsStepRunnerFactory`: step memo in a JetStream key-value bucket
//! - `NatsRunQueue`: JetStream work queue of run requests

use crate::dispatch::{DispatchError, RunDispatcher};
use crate::error::ExecutionError;
use crate::orchestrator::Engine;
use crate::status::{PublishError, StatusEvent, StatusPublisher};
use crate::step::{RetryPolicy, StepFn, StepRunner, StepRunnerFactory};
use crate::trigger::RunRequest;
use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flowforge_core::CorrelationId;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Subject prefix for node status events.
const STATUS_SUBJECT_PREFIX: &str = "flowforge.status";

/// Subject run requests are published on.
const RUNS_SUBJECT: &str = "flowforge.runs.requested";

/// Work-queue stream holding run requests.
const RUNS_STREAM_NAME: &str = "FLOWFORGE_RUNS";

/// Durable consumer shared by engine processes.
const RUNS_CONSUMER_NAME: &str = "flowforge-engine";

/// Key-value bucket for step results.
const STEPS_BUCKET_NAME: &str = "flowforge-steps";

/// Configuration for the NATS collaborators.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Run queue stream (defaults to FLOWFORGE_RUNS).
    pub runs_stream_name: Option<String>,
    /// Durable consumer name (defaults to flowforge-engine).
    pub runs_consumer_name: Option<String>,
    /// Step memo bucket (defaults to flowforge-steps).
    pub steps_bucket_name: Option<String>,
}

impl NatsConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            runs_stream_name: None,
            runs_consumer_name: None,
            steps_bucket_name: None,
        }
    }

    fn runs_stream(&self) -> &str {
        self.runs_stream_name.as_deref().unwrap_or(RUNS_STREAM_NAME)
    }

    fn runs_consumer(&self) -> &str {
        self.runs_consumer_name
            .as_deref()
            .unwrap_or(RUNS_CONSUMER_NAME)
    }

    fn steps_bucket(&self) -> &str {
        self.steps_bucket_name
            .as_deref()
            .unwrap_or(STEPS_BUCKET_NAME)
    }
}

/// Errors from NATS setup and consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatsError {
    /// Could not reach the server.
    ConnectionFailed { message: String },
    /// A stream, consumer or bucket could not be created.
    SetupFailed { message: String },
    /// The run queue stopped delivering.
    ConsumeFailed { message: String },
}

impl fmt::Display for NatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => write!(f, "nats connection failed: {message}"),
            Self::SetupFailed { message } => write!(f, "nats setup failed: {message}"),
            Self::ConsumeFailed { message } => write!(f, "run queue consume failed: {message}"),
        }
    }
}

impl std::error::Error for NatsError {}

/// Connects to the configured server.
///
/// # Errors
///
/// Returns `NatsError::ConnectionFailed` if the server is unreachable.
pub async fn connect(config: &NatsConfig) -> Result<async_nats::Client, NatsError> {
    async_nats::connect(&config.url)
        .await
        .map_err(|e| NatsError::ConnectionFailed {
            message: e.to_string(),
        })
}

fn status_subject(channel: &str, topic: &str) -> String {
    format!("{STATUS_SUBJECT_PREFIX}.{channel}.{topic}")
}

/// Memo key of a step. Step names may contain characters that are not valid
/// in KV keys, so the name is base64url-encoded.
fn step_key(correlation_id: CorrelationId, name: &str) -> String {
    format!("{correlation_id}.{}", URL_SAFE_NO_PAD.encode(name))
}

/// Publishes status events on `flowforge.status.<channel>.<topic>`.
#[derive(Debug, Clone)]
pub struct NatsStatusPublisher {
    client: async_nats::Client,
}

impl NatsStatusPublisher {
    #[must_use]
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusPublisher for NatsStatusPublisher {
    async fn publish(
        &self,
        channel: &str,
        topic: &str,
        event: &StatusEvent,
    ) -> Result<(), PublishError> {
        let bytes = serde_json::to_vec(event).map_err(|e| PublishError {
            message: e.to_string(),
        })?;
        self.client
            .publish(status_subject(channel, topic), bytes.into())
            .await
            .map_err(|e| PublishError {
                message: e.to_string(),
            })
    }
}

/// Step runners whose memo survives process restarts.
#[derive(Clone)]
pub struct NatsStepRunnerFactory {
    store: kv::Store,
    policy: RetryPolicy,
}

impl NatsStepRunnerFactory {
    /// Opens the step bucket, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns `NatsError::SetupFailed` if the bucket cannot be opened.
    pub async fn new(
        jetstream: &jetstream::Context,
        config: &NatsConfig,
        policy: RetryPolicy,
    ) -> Result<Self, NatsError> {
        let bucket = config.steps_bucket();
        let store = match jetstream.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    history: 1,
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                })
                .await
                .map_err(|e| NatsError::SetupFailed {
                    message: format!("failed to create step bucket: {e}"),
                })?,
        };
        Ok(Self { store, policy })
    }
}

impl StepRunnerFactory for NatsStepRunnerFactory {
    fn for_run(&self, correlation_id: CorrelationId) -> Arc<dyn StepRunner> {
        Arc::new(NatsStepRunner {
            store: self.store.clone(),
            correlation_id,
            policy: self.policy,
        })
    }
}

struct NatsStepRunner {
    store: kv::Store,
    correlation_id: CorrelationId,
    policy: RetryPolicy,
}

fn memo_error(e: impl fmt::Display) -> ExecutionError {
    ExecutionError::Persistence {
        reason: format!("step memo: {e}"),
    }
}

#[async_trait]
impl StepRunner for NatsStepRunner {
    async fn run_step<'a>(
        &self,
        name: &str,
        step: &StepFn<'a>,
    ) -> Result<JsonValue, ExecutionError> {
        let key = step_key(self.correlation_id, name);
        if let Some(bytes) = self.store.get(key.as_str()).await.map_err(memo_error)? {
            debug!(step = name, "step replayed from memo");
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let value = self.policy.execute(name, step).await?;
        let bytes = serde_json::to_vec(&value)?;
        self.store
            .put(key.as_str(), bytes.into())
            .await
            .map_err(memo_error)?;
        Ok(value)
    }
}

/// JetStream work queue of run requests.
#[derive(Clone)]
pub struct NatsRunQueue {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsRunQueue {
    /// Ensures the run stream exists.
    ///
    /// # Errors
    ///
    /// Returns `NatsError::SetupFailed` if the stream cannot be created.
    pub async fn new(jetstream: jetstream::Context, config: NatsConfig) -> Result<Self, NatsError> {
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.runs_stream().to_string(),
                subjects: vec![RUNS_SUBJECT.to_string()],
                storage: jetstream::stream::StorageType::File,
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|e| NatsError::SetupFailed {
                message: format!("failed to create run stream: {e}"),
            })?;
        Ok(Self { jetstream, config })
    }

    /// Pulls run requests and executes them, acking each once its run ends.
    ///
    /// Runs until the message stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be created or the stream
    /// fails.
    pub async fn consume(&self, engine: Arc<Engine>, max_concurrent_runs: usize) -> Result<(), NatsError> {
        let setup = |e: String| NatsError::SetupFailed { message: e };
        let stream = self
            .jetstream
            .get_stream(self.config.runs_stream())
            .await
            .map_err(|e| setup(format!("failed to get run stream: {e}")))?;
        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(
                self.config.runs_consumer(),
                jetstream::consumer::pull::Config {
                    durable_name: Some(self.config.runs_consumer().to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| setup(format!("failed to create run consumer: {e}")))?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| NatsError::ConsumeFailed {
                message: e.to_string(),
            })?;

        let permits = Arc::new(Semaphore::new(max_concurrent_runs.max(1)));
        info!(consumer = self.config.runs_consumer(), max_concurrent_runs, "consuming run requests");

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "run queue delivery failed");
                    continue;
                }
            };

            let request: RunRequest = match serde_json::from_slice(&message.payload) {
                Ok(request) => request,
                Err(e) => {
                    // Undecodable requests would be redelivered forever.
                    warn!(error = %e, "discarding malformed run request");
                    if let Err(e) = message.ack().await {
                        warn!(error = %e, "ack failed");
                    }
                    continue;
                }
            };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _ = engine.start_run(request).await;
                if let Err(e) = message.ack().await {
                    warn!(error = %e, "ack failed");
                }
            });
        }

        Err(NatsError::ConsumeFailed {
            message: "message stream ended".to_string(),
        })
    }
}

#[async_trait]
impl RunDispatcher for NatsRunQueue {
    async fn dispatch(&self, request: RunRequest) -> Result<(), DispatchError> {
        let bytes = serde_json::to_vec(&request).map_err(|e| DispatchError {
            message: format!("failed to serialize run request: {e}"),
        })?;
        self.jetstream
            .publish(RUNS_SUBJECT, bytes.into())
            .await
            .map_err(|e| DispatchError {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| DispatchError {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nats_config_defaults() {
        let config = NatsConfig::new("nats://localhost:4222");

        assert_eq!(config.runs_stream(), RUNS_STREAM_NAME);
        assert_eq!(config.runs_consumer(), RUNS_CONSUMER_NAME);
        assert_eq!(config.steps_bucket(), STEPS_BUCKET_NAME);
    }

    #[test]
    fn nats_config_custom() {
        let config = NatsConfig {
            url: "nats://localhost:4222".to_string(),
            runs_stream_name: Some("RUNS_STAGING".to_string()),
            runs_consumer_name: Some("staging-engine".to_string()),
            steps_bucket_name: Some("staging-steps".to_string()),
        };

        assert_eq!(config.runs_stream(), "RUNS_STAGING");
        assert_eq!(config.runs_consumer(), "staging-engine");
        assert_eq!(config.steps_bucket(), "staging-steps");
    }

    #[test]
    fn status_subject_includes_channel_and_topic() {
        assert_eq!(
            status_subject("http-request-execution", "status"),
            "flowforge.status.http-request-execution.status"
        );
    }

    #[test]
    fn step_keys_are_scoped_and_kv_safe() {
        let run = CorrelationId::new();
        let start = step_key(run, "node-start:a");
        let dashed = step_key(run, "node-start-a");

        assert!(start.starts_with(&format!("{run}.")));
        assert_ne!(start, dashed);
        assert!(
            start
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        );
        assert_ne!(start, step_key(CorrelationId::new(), "node-start:a"));
    }
}
