//! Domain model: ids, task state, schedules, the task record and its views.

pub mod ids;
pub mod outcome;
pub mod schedule;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod task;

pub use ids::{Id, IdMarker, ParseIdError, RunId, TaskId};
pub use outcome::TaskFailure;
pub use schedule::Schedule;
pub use snapshot::{RestoredTask, TaskSnapshot};
pub use state::TaskState;
pub use status::TaskStatus;
pub use task::{Args, CallableRef, Kwargs, Task};
