//! State - タスクの状態機械

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskState はタスクの状態を表現
///
/// # 状態遷移
/// - Waiting -> Running -> Finished | Error
/// - Running -> TimedOut（timeout watcher）
/// - Waiting | Running -> Canceled
/// - 完了状態 -> Waiting（interval の re-arm のみ）
///
/// Finished / Error / TimedOut / Canceled を「完了」と呼ぶ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, waiting for its scheduled time and a free slot.
    Waiting,

    /// Body is executing on a worker.
    Running,

    /// Body returned a value.
    Finished,

    /// Body failed; exception and traceback are populated.
    Error,

    /// Forced out by the timeout watcher.
    TimedOut,

    /// Canceled before or during execution.
    Canceled,
}

impl TaskState {
    /// Is this a terminal ("complete") state?
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Error | TaskState::TimedOut | TaskState::Canceled
        )
    }

    /// Can this task still be canceled?
    pub fn is_cancelable(self) -> bool {
        matches!(self, TaskState::Waiting | TaskState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Error => "error",
            TaskState::TimedOut => "timed_out",
            TaskState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::waiting(TaskState::Waiting, false)]
    #[case::running(TaskState::Running, false)]
    #[case::finished(TaskState::Finished, true)]
    #[case::error(TaskState::Error, true)]
    #[case::timed_out(TaskState::TimedOut, true)]
    #[case::canceled(TaskState::Canceled, true)]
    fn complete_states(#[case] state: TaskState, #[case] complete: bool) {
        assert_eq!(state.is_complete(), complete);
        assert_eq!(state.is_cancelable(), !complete);
    }

    #[test]
    fn serde_name_matches_display() {
        let json = serde_json::to_value(TaskState::TimedOut).unwrap();
        assert_eq!(json, serde_json::json!("timed_out"));
        assert_eq!(TaskState::TimedOut.to_string(), "timed_out");
    }
}
