//! Durable steps.
//!
//! Every side effect of a run goes through [`StepRunner::run_step`] under a
//! name that is stable across replays. A step that has succeeded once for a
//! run returns its recorded result on every later call with the same name,
//! so replaying a run after a crash or retry never repeats completed work.

use crate::error::ExecutionError;
use async_trait::async_trait;
use flowforge_core::CorrelationId;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Future produced by one attempt of a step.
pub type StepFuture<'a> = BoxFuture<'a, Result<JsonValue, ExecutionError>>;

/// A re-invocable unit of work. Called once per attempt.
pub type StepFn<'a> = dyn Fn() -> StepFuture<'a> + Send + Sync + 'a;

/// Runs named steps with at most one effective execution each.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Returns the recorded result of `name`, or runs `step` and records it.
    ///
    /// # Errors
    ///
    /// Returns the step's last error once the retry policy gives up, or
    /// immediately for non-retriable errors.
    async fn run_step<'a>(
        &self,
        name: &str,
        step: &StepFn<'a>,
    ) -> Result<JsonValue, ExecutionError>;
}

/// Hands out the step runner for one run.
pub trait StepRunnerFactory: Send + Sync {
    /// All runners returned for the same correlation id share one memo.
    fn for_run(&self, correlation_id: CorrelationId) -> Arc<dyn StepRunner>;
}

/// Runs a step and decodes its result.
///
/// # Errors
///
/// Returns the step error, or `ExecutionError::Serialization` if the
/// recorded value does not decode as `T`.
pub async fn run_typed<'a, T: DeserializeOwned>(
    runner: &dyn StepRunner,
    name: &str,
    step: &StepFn<'a>,
) -> Result<T, ExecutionError> {
    let value = runner.run_step(name, step).await?;
    Ok(serde_json::from_value(value)?)
}

/// Exponential backoff for retriable step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `step` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `step`.
    pub async fn execute<'a>(
        &self,
        name: &str,
        step: &StepFn<'a>,
    ) -> Result<JsonValue, ExecutionError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match step().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        step = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Step runner that memoizes results in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStepRunner {
    memo: Mutex<HashMap<String, JsonValue>>,
    policy: RetryPolicy,
}

impl InMemoryStepRunner {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Names of steps that have a recorded result, sorted.
    #[must_use]
    pub fn completed_steps(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .memo
            .lock()
            .map(|memo| memo.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn recorded(&self, name: &str) -> Result<Option<JsonValue>, ExecutionError> {
        let memo = self.memo.lock().map_err(poisoned)?;
        Ok(memo.get(name).cloned())
    }

    fn record(&self, name: &str, value: &JsonValue) -> Result<(), ExecutionError> {
        let mut memo = self.memo.lock().map_err(poisoned)?;
        memo.insert(name.to_string(), value.clone());
        Ok(())
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> ExecutionError {
    ExecutionError::Persistence {
        reason: format!("step memo lock poisoned: {e}"),
    }
}

#[async_trait]
impl StepRunner for InMemoryStepRunner {
    async fn run_step<'a>(
        &self,
        name: &str,
        step: &StepFn<'a>,
    ) -> Result<JsonValue, ExecutionError> {
        if let Some(value) = self.recorded(name)? {
            debug!(step = name, "step replayed from memo");
            return Ok(value);
        }
        let value = self.policy.execute(name, step).await?;
        self.record(name, &value)?;
        Ok(value)
    }
}

/// Factory keeping one [`InMemoryStepRunner`] per correlation id.
#[derive(Debug, Default)]
pub struct InMemoryStepRunnerFactory {
    runs: Mutex<HashMap<CorrelationId, Arc<InMemoryStepRunner>>>,
    policy: RetryPolicy,
}

impl InMemoryStepRunnerFactory {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// The concrete runner for a run, creating it if needed.
    #[must_use]
    pub fn runner(&self, correlation_id: CorrelationId) -> Arc<InMemoryStepRunner> {
        match self.runs.lock() {
            Ok(mut runs) => runs
                .entry(correlation_id)
                .or_insert_with(|| Arc::new(InMemoryStepRunner::new(self.policy)))
                .clone(),
            // A poisoned map loses memoization for this run only.
            Err(_) => Arc::new(InMemoryStepRunner::new(self.policy)),
        }
    }
}

impl StepRunnerFactory for InMemoryStepRunnerFactory {
    fn for_run(&self, correlation_id: CorrelationId) -> Arc<dyn StepRunner> {
        self.runner(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn completed_step_is_not_repeated() {
        let runner = InMemoryStepRunner::new(RetryPolicy::none());
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let step = move || {
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, ExecutionError>(json!({ "call": n }))
            }
            .boxed()
        };

        let first = runner.run_step("send-email", &step).await.expect("first");
        let second = runner.run_step("send-email", &step).await.expect("second");

        assert_eq!(first, json!({ "call": 1 }));
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.completed_steps(), vec!["send-email".to_string()]);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let runner = InMemoryStepRunner::new(fast_policy(3));
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let step = move || {
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExecutionError::Transient {
                        node_id: NodeId::from("http"),
                        reason: "timeout".to_string(),
                    })
                } else {
                    Ok(json!("done"))
                }
            }
            .boxed()
        };

        let value = runner.run_step("call", &step).await.expect("third attempt");
        assert_eq!(value, json!("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let runner = InMemoryStepRunner::new(fast_policy(2));
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let step = move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::Transient {
                    node_id: NodeId::from("http"),
                    reason: "503".to_string(),
                })
            }
            .boxed()
        };

        assert!(runner.run_step("call", &step).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(runner.completed_steps().is_empty());
    }

    #[tokio::test]
    async fn configuration_errors_are_not_retried() {
        let runner = InMemoryStepRunner::new(fast_policy(5));
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let step = move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::MissingField {
                    node_id: NodeId::from("http"),
                    field: "endpoint".to_string(),
                })
            }
            .boxed()
        };

        assert!(matches!(
            runner.run_step("call", &step).await,
            Err(ExecutionError::MissingField { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn factory_shares_memo_per_correlation_id() {
        let factory = InMemoryStepRunnerFactory::new(RetryPolicy::none());
        let run = CorrelationId::new();
        let step = || async { Ok::<_, ExecutionError>(json!(1)) }.boxed();

        factory
            .for_run(run)
            .run_step("create-execution", &step)
            .await
            .expect("step");

        assert_eq!(factory.runner(run).completed_steps().len(), 1);
        assert!(factory.runner(CorrelationId::new()).completed_steps().is_empty());
    }
}
