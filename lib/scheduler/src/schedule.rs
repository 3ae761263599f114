//! Cron expressions and minute matching.

use crate::error::ScheduleError;
use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// The expression as configured.
    pub expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses an expression.
    ///
    /// Standard 5-field expressions use Unix day-of-week numbering (0-7,
    /// Sunday is 0 or 7) and get a leading `0` seconds field. 6- and 7-field
    /// expressions are used as written, with Sunday=1.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::InvalidCronExpression` if the expression does
    /// not parse.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.as_slice() {
            [minute, hour, day, month, weekday] => {
                let weekday = unix_day_of_week(weekday).map_err(invalid)?;
                format!("0 {minute} {hour} {day} {month} {weekday}")
            }
            _ => fields.join(" "),
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The first fire time strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Returns true if the schedule fires at the minute containing `now`.
    #[must_use]
    pub fn fires_at(&self, now: DateTime<Utc>) -> bool {
        let minute = top_of_minute(now);
        self.next_after(minute - Duration::minutes(1)) == Some(minute)
    }
}

/// Rewrites a Unix day-of-week field into the 1-7, Sunday=1 numbering the
/// `cron` crate expects. Numeric items are expanded into an explicit list;
/// day names pass through.
fn unix_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic() || c == '#') {
            named.push(item.to_string());
            continue;
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{item}'"))?;
                if step == 0 {
                    return Err(format!("invalid day-of-week step '{item}'"));
                }
                (range, Some(step))
            }
            None => (item, None),
        };
        let (start, end) = match (range, range.split_once('-')) {
            ("*", _) => (0, 6),
            (_, Some((start, end))) => (weekday_number(start)?, weekday_number(end)?),
            (single, None) => {
                let day = weekday_number(single)?;
                // `n/step` runs from n to the end of the week.
                (day, if step.is_some() { 6 } else { day })
            }
        };
        if start > end {
            return Err(format!("day-of-week range '{item}' runs backwards"));
        }
        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7 + 1);
        }
    }

    Ok(days
        .iter()
        .map(u32::to_string)
        .chain(named)
        .collect::<Vec<_>>()
        .join(","))
}

fn weekday_number(raw: &str) -> Result<u32, String> {
    raw.parse::<u32>()
        .ok()
        .filter(|day| *day <= 7)
        .ok_or_else(|| format!("day-of-week '{raw}' is not in 0-7"))
}

/// Truncates to the start of the minute.
#[must_use]
pub fn top_of_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}
