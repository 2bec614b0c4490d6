//! Lossless, serializable capture of a task's observable fields.
//!
//! A snapshot carries the callable's name but not the callable itself, so a
//! restored task can be inspected and reported on but never executed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{RunId, TaskId};
use super::schedule::Schedule;
use super::state::TaskState;
use super::status::TaskStatus;
use super::task::{Args, CallableRef, Kwargs, Task};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(flatten)]
    pub callable: CallableRef,
    pub args: Args,
    pub kwargs: Kwargs,
    pub state: TaskState,
    pub schedule: Schedule,
    pub scheduled_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub exception: Option<String>,
    pub traceback: Option<String>,
    pub progress: Option<Value>,
    pub timeout: Option<Duration>,
    pub run_count: u32,
    pub last_run: Option<RunId>,
    /// Task revision at capture. A store keeps the highest one it has seen.
    #[serde(default)]
    pub revision: u64,
    pub captured_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn capture(task: &Task) -> Self {
        Self {
            id: task.id(),
            callable: task.callable_ref().clone(),
            args: task.arguments().to_vec(),
            kwargs: task.keyword_arguments().clone(),
            state: task.state(),
            schedule: task.schedule_policy().clone(),
            scheduled_time: task.scheduled_time(),
            start_time: task.start_time(),
            finish_time: task.finish_time(),
            result: task.result().cloned(),
            exception: task.exception().map(str::to_string),
            traceback: task.traceback().map(str::to_string),
            progress: task.progress(),
            timeout: task.timeout_duration(),
            run_count: task.run_count(),
            last_run: task.current_run(),
            revision: task.revision(),
            captured_at: Utc::now(),
        }
    }

    pub fn restore(&self) -> RestoredTask {
        RestoredTask {
            snapshot: self.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether this capture is older than `held`, so saving it would lose
    /// a later transition.
    pub fn is_superseded_by(&self, held: &TaskSnapshot) -> bool {
        self.revision < held.revision
    }
}

/// A task rebuilt from a snapshot. Read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredTask {
    snapshot: TaskSnapshot,
}

impl RestoredTask {
    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    pub fn id(&self) -> TaskId {
        self.snapshot.id
    }

    pub fn callable_ref(&self) -> &CallableRef {
        &self.snapshot.callable
    }

    pub fn state(&self) -> TaskState {
        self.snapshot.state
    }

    pub fn result(&self) -> Option<&Value> {
        self.snapshot.result.as_ref()
    }

    pub fn exception(&self) -> Option<&str> {
        self.snapshot.exception.as_deref()
    }

    pub fn traceback(&self) -> Option<&str> {
        self.snapshot.traceback.as_deref()
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.snapshot.scheduled_time
    }

    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.snapshot.finish_time
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from(self)
    }
}
