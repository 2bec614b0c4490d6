use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

/// Number of tasks per state, as held by a queue right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub running: usize,
    pub finished: usize,
    pub error: usize,
    pub timed_out: usize,
    pub canceled: usize,
}

impl QueueCounts {
    pub(crate) fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Waiting => self.waiting += 1,
            TaskState::Running => self.running += 1,
            TaskState::Finished => self.finished += 1,
            TaskState::Error => self.error += 1,
            TaskState::TimedOut => self.timed_out += 1,
            TaskState::Canceled => self.canceled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.waiting + self.running + self.finished + self.error + self.timed_out + self.canceled
    }

    /// Tasks that have not reached a terminal state.
    pub fn incomplete(&self) -> usize {
        self.waiting + self.running
    }
}

impl FromIterator<TaskState> for QueueCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = Self::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}
