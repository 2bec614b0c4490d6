//! How a run ends, and the human-readable trace recorded for failures.

use std::error::Error as StdError;
use std::fmt::Write as _;

use super::ids::{RunId, TaskId};
use super::task::CallableRef;

/// Why a task body did not produce a value.
///
/// Any `std::error::Error` converts into `Failed`, keeping its source chain,
/// so bodies can use `?` on their own error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// The body observed an interrupt and stopped.
    Canceled,

    /// The body failed. `causes` is the error's source chain, outermost first.
    Failed { message: String, causes: Vec<String> },
}

impl TaskFailure {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Canceled => "canceled".to_string(),
            Self::Failed { message, .. } => message.clone(),
        }
    }
}

impl<E: StdError> From<E> for TaskFailure {
    fn from(err: E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self::Failed {
            message: err.to_string(),
            causes,
        }
    }
}

/// Render the trace stored alongside a failed task's exception.
///
/// Never empty: even a bare message gets the task/run header and the
/// callable it came from.
pub(crate) fn render_traceback(
    task_id: TaskId,
    run_id: RunId,
    callable: &CallableRef,
    failure: &TaskFailure,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Traceback ({task_id}, {run_id}):");
    let _ = writeln!(out, "  in {callable}");
    match failure {
        TaskFailure::Canceled => {
            let _ = write!(out, "Canceled");
        }
        TaskFailure::Failed { message, causes } => {
            let _ = write!(out, "Error: {message}");
            if !causes.is_empty() {
                let _ = write!(out, "\n\nCaused by:");
                for (i, cause) in causes.iter().enumerate() {
                    let _ = write!(out, "\n    {i}: {cause}");
                }
            }
        }
    }
    out
}
