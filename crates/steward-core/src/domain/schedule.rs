//! Scheduling policies: when a task becomes eligible and whether it recurs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StewardError};

/// Schedule attached to a task.
///
/// The queue's eligibility check consumes this; the task body never sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Eligible as soon as it is enqueued.
    #[default]
    Immediate,

    /// Eligible once `now >= when`. A past `when` is eligible right away.
    At { when: DateTime<Utc> },

    /// Eligible at `start`, then every `every` after each completed run.
    /// Without `start`, the first run is when the task is enqueued.
    Interval {
        every: Duration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<DateTime<Utc>>,
    },
}

impl Schedule {
    pub fn at(when: DateTime<Utc>) -> Self {
        Self::At { when }
    }

    /// Recurring schedule whose first run is at enqueue time.
    pub fn every(every: Duration) -> Self {
        Self::Interval { every, start: None }
    }

    /// Recurring schedule with an explicit first run.
    pub fn every_from(every: Duration, start: DateTime<Utc>) -> Self {
        Self::Interval {
            every,
            start: Some(start),
        }
    }

    /// First eligible instant, given when the task was created.
    pub fn first_run(&self, created: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Immediate => created,
            Self::At { when } => *when,
            Self::Interval { start, .. } => start.unwrap_or(created),
        }
    }

    /// Next scheduled time after a run that was scheduled for `previous` and
    /// completed at `finished`.
    ///
    /// Advances by whole intervals until strictly after `finished`, so a run
    /// that overshoots its period skips the missed slots instead of firing a
    /// burst of catch-up runs.
    pub fn next_run(
        &self,
        previous: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let Self::Interval { every, .. } = self else {
            return None;
        };
        let step = chrono::Duration::from_std(*every).ok()?;
        if step <= chrono::Duration::zero() {
            return None;
        }

        let next = previous.checked_add_signed(step)?;
        if next > finished {
            return Some(next);
        }
        let behind = (finished - next).num_milliseconds();
        let skipped = behind / step.num_milliseconds().max(1) + 1;
        next.checked_add_signed(step.checked_mul(i32::try_from(skipped).ok()?)?)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Interval { every, .. } if every.is_zero() => Err(
                StewardError::InvalidSchedule("interval must be greater than 0".into()),
            ),
            Self::Interval { every, .. } if chrono::Duration::from_std(*every).is_err() => Err(
                StewardError::InvalidSchedule("interval is out of range".into()),
            ),
            _ => Ok(()),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Interval { .. })
    }

    /// Wire tag: `immediate`, `at` or `interval`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::At { .. } => "at",
            Self::Interval { .. } => "interval",
        }
    }
}
