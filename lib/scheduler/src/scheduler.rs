//! The cron scan loop.

use crate::error::SchedulerError;
use crate::schedule::{CronSchedule, top_of_minute};
use chrono::{DateTime, Duration as MinuteOffset, SecondsFormat, Utc};
use flowforge_workflow::dispatch::RunDispatcher;
use flowforge_workflow::store::WorkflowStore;
use flowforge_workflow::trigger::{RunRequest, TriggerKind};
use rootcause::Report;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Counts from one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Cron trigger nodes examined.
    pub scanned: usize,
    /// Runs dispatched.
    pub triggered: usize,
    /// Triggers whose expression did not parse.
    pub skipped_invalid: usize,
    /// The minute had already been scanned, so nothing was done.
    pub already_scanned: bool,
}

/// Dispatches runs for cron triggers due in the current minute.
pub struct Scheduler {
    workflows: Arc<dyn WorkflowStore>,
    dispatcher: Arc<dyn RunDispatcher>,
    last_minute: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(workflows: Arc<dyn WorkflowStore>, dispatcher: Arc<dyn RunDispatcher>) -> Self {
        Self {
            workflows,
            dispatcher,
            last_minute: Mutex::new(None),
        }
    }

    /// Records `minute` as scanned. Returns false if it, or a later minute,
    /// was claimed already.
    fn claim_minute(&self, minute: DateTime<Utc>) -> bool {
        let mut last = self
            .last_minute
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.is_some_and(|scanned| scanned >= minute) {
            return false;
        }
        *last = Some(minute);
        true
    }

    /// Scans all cron triggers and dispatches those due at `now`.
    ///
    /// Each minute is scanned at most once; later ticks in the same minute
    /// return a report with `already_scanned` set. Due runs are dispatched
    /// as one batch at the end of the tick.
    ///
    /// # Errors
    ///
    /// Fails if the trigger scan or the dispatch fails; malformed
    /// expressions are skipped, not errors.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, Report<SchedulerError>> {
        let now = top_of_minute(now);
        if !self.claim_minute(now) {
            debug!(minute = %now, "minute already scanned");
            return Ok(TickReport {
                already_scanned: true,
                ..TickReport::default()
            });
        }
        let triggers = self
            .workflows
            .cron_triggers()
            .await
            .map_err(|e| SchedulerError::ScanFailed {
                reason: e.to_string(),
            })?;

        let mut report = TickReport {
            scanned: triggers.len(),
            ..TickReport::default()
        };
        let trigger_time = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut due = Vec::new();

        for trigger in &triggers {
            let Some(expression) = trigger.cron() else {
                continue;
            };
            match CronSchedule::parse(expression) {
                Ok(schedule) if schedule.fires_at(now) => {
                    debug!(workflow_id = %trigger.workflow_id, node_id = %trigger.node_id, "cron trigger due");
                    due.push(
                        RunRequest::new(trigger.workflow_id, json!({ "triggerTime": trigger_time }))
                            .with_trigger(TriggerKind::Cron),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        workflow_id = %trigger.workflow_id,
                        node_id = %trigger.node_id,
                        error = %e,
                        "skipping malformed cron trigger"
                    );
                    report.skipped_invalid += 1;
                }
            }
        }

        report.triggered = due.len();
        if !due.is_empty() {
            let count = due.len();
            self.dispatcher
                .dispatch_batch(due)
                .await
                .map_err(|e| SchedulerError::DispatchFailed {
                    count,
                    reason: e.to_string(),
                })?;
        }

        info!(
            scanned = report.scanned,
            triggered = report.triggered,
            skipped_invalid = report.skipped_invalid,
            "scheduler tick"
        );
        Ok(report)
    }

    /// Ticks every `period` forever, starting just after the next minute
    /// boundary. Missed ticks are skipped, so a slow tick never causes a
    /// burst of catch-up ticks.
    pub async fn run(&self, period: Duration) {
        let start = Instant::now() + until_next_minute(Utc::now());
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(report) = self.tick(Utc::now()).await {
                error!(error = ?report, "scheduler tick failed");
            }
        }
    }
}

/// Time from `now` to one second past the next minute boundary.
fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let next = top_of_minute(now) + MinuteOffset::minutes(1) + MinuteOffset::seconds(1);
    (next - now).to_std().unwrap_or_default()
}
