use std::path::PathBuf;

use thiserror::Error;

use crate::domain::TaskId;

pub type Result<T> = std::result::Result<T, StewardError>;

/// Caller-facing errors.
///
/// Task bodies and content handlers never surface here: their failures are
/// recorded as data (task state, report details). Only usage errors and
/// infrastructure failures cross the queue/dispatcher boundary.
#[derive(Debug, Error)]
pub enum StewardError {
    #[error("unknown task field: {0}")]
    UnknownField(String),

    #[error("malformed content unit at index {index}: {reason}")]
    MalformedUnit { index: usize, reason: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("dispatch loop is already running")]
    AlreadyStarted,

    #[error("handler factory '{0}' is already registered")]
    FactoryAlreadyRegistered(String),

    #[error("bad handler descriptor {path}: {reason}")]
    Descriptor { path: PathBuf, reason: String },

    #[error("snapshot store: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
