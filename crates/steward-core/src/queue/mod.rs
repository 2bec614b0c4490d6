//! Task queue: config, search criteria, the FIFO implementation and its
//! dispatch loop.

mod config;
mod criteria;
mod dispatch_loop;
mod fifo;

pub use config::QueueConfig;
pub use criteria::{Criteria, TaskField};
pub use dispatch_loop::DispatchLoop;
pub use fifo::{FifoTaskQueue, FifoTaskQueueBuilder};

use async_trait::async_trait;

use crate::domain::{Task, TaskId, TaskStatus};
use crate::error::Result;
use crate::observability::QueueCounts;

/// Queue port.
///
/// Design intent:
/// - The queue owns every state transition of the tasks it holds.
/// - Callers only see [`TaskStatus`] views; the table is never handed out.
/// - Task failures are task state, not `Err`. `Err` means misuse
///   (unknown field, unknown id, invalid schedule).
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a task. With `unique`, an equivalent incomplete task (same
    /// callable, args and kwargs) is returned instead of adding a new one.
    async fn enqueue(&self, task: Task, unique: bool) -> Result<TaskStatus>;

    /// Tasks matching every term, in enqueue order. An unknown field name
    /// matches nothing.
    async fn find(&self, criteria: &Criteria) -> Vec<TaskStatus>;

    /// Is there a stored task equal to `task` on all of `fields`?
    /// Unknown field names are an error.
    async fn exists(&self, task: &Task, fields: &[&str]) -> Result<bool>;

    /// Cancel a waiting task, or signal a running one. Completed tasks are
    /// left as they are.
    async fn cancel(&self, id: TaskId) -> Result<TaskStatus>;

    async fn status(&self, id: TaskId) -> Result<TaskStatus>;

    async fn counts(&self) -> QueueCounts;
}
