//! Scheduler for cron triggers.
//!
//! This crate provides:
//!
//! - **Cron Schedules**: Parsing of 5-, 6- and 7-field expressions and minute matching
//! - **Scheduler**: A once-per-minute scan that dispatches due workflows

pub mod error;
pub mod schedule;
pub mod scheduler;

pub use error::{ScheduleError, SchedulerError};
pub use schedule::{CronSchedule, top_of_minute};
pub use scheduler::{Scheduler, TickReport};
