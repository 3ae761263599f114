//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: a single cron expression could not be used
//! - `SchedulerError`: a whole tick failed and is reported through rootcause

use std::fmt;

/// Errors from schedule operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Tick-level scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Cron triggers could not be loaded.
    ScanFailed { reason: String },
    /// The batch of due runs could not be handed off.
    DispatchFailed { count: usize, reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanFailed { reason } => write!(f, "cron trigger scan failed: {reason}"),
            Self::DispatchFailed { count, reason } => {
                write!(f, "dispatching {count} scheduled runs failed: {reason}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "invalid".to_string(),
            reason: "expected 5 parts".to_string(),
        };
        assert!(err.to_string().contains("invalid"));
        assert!(err.to_string().contains("5 parts"));
    }

    #[test]
    fn scheduler_error_display() {
        let err = SchedulerError::DispatchFailed {
            count: 3,
            reason: "queue unavailable".to_string(),
        };
        assert!(err.to_string().contains("3 scheduled runs"));
    }
}
