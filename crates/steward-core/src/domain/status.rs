use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::TaskId;
use super::snapshot::RestoredTask;
use super::state::TaskState;
use super::task::Task;

/// Read-only view of a task, as returned by queue queries.
///
/// Timestamps serialize as RFC 3339; absent values as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub class_name: Option<String>,
    pub method_name: String,
    pub state: TaskState,
    pub result: Option<Value>,
    pub exception: Option<String>,
    pub traceback: Option<String>,
    pub progress: Option<Value>,
    pub scheduled_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    /// Schedule kind: `immediate`, `at` or `interval`.
    pub scheduler: String,
    pub run_count: u32,
}

impl From<&Task> for TaskStatus {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            class_name: task.class_name().map(str::to_string),
            method_name: task.method_name().to_string(),
            state: task.state(),
            result: task.result().cloned(),
            exception: task.exception().map(str::to_string),
            traceback: task.traceback().map(str::to_string),
            progress: task.progress(),
            scheduled_time: task.scheduled_time(),
            start_time: task.start_time(),
            finish_time: task.finish_time(),
            scheduler: task.schedule_policy().kind().to_string(),
            run_count: task.run_count(),
        }
    }
}

impl From<&RestoredTask> for TaskStatus {
    fn from(task: &RestoredTask) -> Self {
        let snap = task.snapshot();
        Self {
            id: snap.id,
            class_name: snap.callable.class_name.clone(),
            method_name: snap.callable.method_name.clone(),
            state: snap.state,
            result: snap.result.clone(),
            exception: snap.exception.clone(),
            traceback: snap.traceback.clone(),
            progress: snap.progress.clone(),
            scheduled_time: snap.scheduled_time,
            start_time: snap.start_time,
            finish_time: snap.finish_time,
            scheduler: snap.schedule.kind().to_string(),
            run_count: snap.run_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CallableRef, Schedule};
    use crate::runtime::callable;
    use std::time::Duration;

    #[test]
    fn waiting_task_serializes_nulls_and_kind() {
        let task = Task::new(callable(CallableRef::method("Repo", "sync"), |_c, _a, _k| async {
            Ok(Value::Null)
        }))
        .schedule(Schedule::every(Duration::from_secs(60)));

        let json = serde_json::to_value(task.status()).unwrap();
        assert_eq!(json["state"], "waiting");
        assert_eq!(json["class_name"], "Repo");
        assert_eq!(json["method_name"], "sync");
        assert_eq!(json["scheduler"], "interval");
        assert!(json["start_time"].is_null());
        assert!(json["result"].is_null());
        // RFC 3339 text, parseable back
        let scheduled = json["scheduled_time"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(scheduled).is_ok());
    }
}
