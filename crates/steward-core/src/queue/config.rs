use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for [`FifoTaskQueue`](super::FifoTaskQueue).
///
/// Deserializable so it can live in a config file; missing keys take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on tasks in `Running` at once.
    pub max_running: usize,

    /// Longest the dispatch loop sleeps between checks when nothing wakes it.
    pub poll_interval_ms: u64,

    /// How long completed tasks stay queryable before eviction.
    pub completed_retention_ms: u64,

    /// Timeout for tasks that don't carry their own. `None` means unbounded.
    pub default_timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_running: 4,
            poll_interval_ms: 500,
            completed_retention_ms: 3_600_000,
            default_timeout_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn with_max_running(mut self, max_running: usize) -> Self {
        self.max_running = max_running;
        self
    }

    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval_ms = millis(every);
        self
    }

    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention_ms = millis(retention);
        self
    }

    /// Sub-millisecond timeouts round up so a non-zero timeout never
    /// becomes zero.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        let ms = millis(timeout);
        let rounded = if timeout > Duration::from_millis(ms) { ms.saturating_add(1) } else { ms };
        self.default_timeout_ms = Some(rounded);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_millis(self.completed_retention_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// A zero cap would never run anything; treat it as one.
    pub(crate) fn running_cap(&self) -> usize {
        self.max_running.max(1)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
