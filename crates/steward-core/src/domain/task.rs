//! The task record: a callable plus its arguments, schedule and lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{RunId, TaskId};
use super::outcome::{TaskFailure, render_traceback};
use super::schedule::Schedule;
use super::snapshot::TaskSnapshot;
use super::state::TaskState;
use super::status::TaskStatus;
use crate::runtime::{Callable, InterruptHandle, Invocation, Progress, TaskContext, interrupt_pair, join_body};

pub type Args = Vec<Value>;
pub type Kwargs = BTreeMap<String, Value>;

/// Stable name of a callable: `Class.method`, or a bare function name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallableRef {
    pub class_name: Option<String>,
    pub method_name: String,
}

impl CallableRef {
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            class_name: None,
            method_name: name.into(),
        }
    }

    pub fn method(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            method_name: method_name.into(),
        }
    }
}

impl fmt::Display for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class_name {
            Some(class) => write!(f, "{class}.{}", self.method_name),
            None => f.write_str(&self.method_name),
        }
    }
}

/// A unit of deferred work.
///
/// Lifecycle fields only move through the transition methods, so the state
/// and its timestamps stay consistent:
/// - `start_time` is set once the task has run
/// - `finish_time` is set iff the state is complete
/// - `result` only on `Finished`, `exception`/`traceback` only on `Error`
pub struct Task {
    id: TaskId,
    callable: Arc<dyn Callable>,
    callable_ref: CallableRef,
    args: Args,
    kwargs: Kwargs,

    state: TaskState,
    schedule: Schedule,
    created: DateTime<Utc>,
    scheduled_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,

    result: Option<Value>,
    exception: Option<String>,
    traceback: Option<String>,
    progress: Progress,

    timeout: Option<Duration>,
    run_count: u32,
    current_run: Option<RunId>,
    interrupt: Option<InterruptHandle>,
    cancel_requested: bool,

    /// Bumped by every transition; orders snapshots of this task.
    revision: u64,
}

impl Task {
    pub fn new(callable: Arc<dyn Callable>) -> Self {
        let now = Utc::now();
        let callable_ref = callable.callable_ref();
        Self {
            id: TaskId::generate(),
            callable,
            callable_ref,
            args: Args::new(),
            kwargs: Kwargs::new(),
            state: TaskState::Waiting,
            schedule: Schedule::Immediate,
            created: now,
            scheduled_time: now,
            start_time: None,
            finish_time: None,
            result: None,
            exception: None,
            traceback: None,
            progress: Progress::new(),
            timeout: None,
            run_count: 0,
            current_run: None,
            interrupt: None,
            cancel_requested: false,
            revision: 0,
        }
    }

    /// Reuse an existing id, e.g. to look a task up with `exists` by id.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Upper bound on one run's wall-clock time. Overrides the queue default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a schedule; the scheduled time becomes the schedule's first run.
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.scheduled_time = schedule.first_run(self.created);
        self.schedule = schedule;
        self
    }

    // ----- accessors -----

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn callable_ref(&self) -> &CallableRef {
        &self.callable_ref
    }

    pub fn class_name(&self) -> Option<&str> {
        self.callable_ref.class_name.as_deref()
    }

    pub fn method_name(&self) -> &str {
        &self.callable_ref.method_name
    }

    pub fn arguments(&self) -> &[Value] {
        &self.args
    }

    pub fn keyword_arguments(&self) -> &Kwargs {
        &self.kwargs
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn schedule_policy(&self) -> &Schedule {
        &self.schedule
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.scheduled_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.finish_time
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }

    pub fn progress(&self) -> Option<Value> {
        self.progress.current()
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.current_run
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from(self)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot::capture(self)
    }

    /// Same callable with equal arguments; the basis of duplicate detection.
    pub fn same_call(&self, other: &Task) -> bool {
        self.callable_ref == other.callable_ref
            && self.args == other.args
            && self.kwargs == other.kwargs
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Waiting && self.scheduled_time <= now
    }

    /// Recurring and not canceled: will go back to waiting once complete.
    pub fn will_rearm(&self) -> bool {
        self.schedule.is_recurring() && self.state != TaskState::Canceled && !self.cancel_requested
    }

    /// When the current run exceeds its timeout, if it has one.
    pub fn deadline(&self, default_timeout: Option<Duration>) -> Option<DateTime<Utc>> {
        if self.state != TaskState::Running {
            return None;
        }
        let timeout = chrono::Duration::from_std(self.timeout.or(default_timeout)?).ok()?;
        self.start_time?.checked_add_signed(timeout)
    }

    // ----- transitions -----

    /// Re-base creation time onto the queue's clock. Fixed schedules keep
    /// their instants; `Immediate` and unanchored intervals start at `now`.
    pub(crate) fn enqueued_at(&mut self, now: DateTime<Utc>) {
        if self.state != TaskState::Waiting || self.run_count > 0 {
            return;
        }
        self.created = now;
        self.scheduled_time = self.schedule.first_run(now);
    }

    /// Request cancellation. Returns whether the request had any effect.
    ///
    /// A waiting task is canceled immediately. A running task is signaled
    /// and becomes canceled once its body observes the interrupt.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            TaskState::Waiting => {
                self.state = TaskState::Canceled;
                self.finish_time = Some(now);
                self.revision += 1;
                true
            }
            TaskState::Running => {
                self.cancel_requested = true;
                if let Some(handle) = &self.interrupt {
                    handle.interrupt();
                }
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn begin_run(&mut self, now: DateTime<Utc>) -> Invocation {
        let run_id = RunId::generate();
        let (handle, interrupter) = interrupt_pair();

        self.state = TaskState::Running;
        self.start_time = Some(now);
        self.finish_time = None;
        self.result = None;
        self.exception = None;
        self.traceback = None;
        self.progress.set(None);
        self.run_count += 1;
        self.current_run = Some(run_id);
        self.interrupt = Some(handle);
        self.cancel_requested = false;
        self.revision += 1;

        Invocation {
            callable: Arc::clone(&self.callable),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            ctx: TaskContext::new(self.id, run_id, interrupter, self.progress.clone()),
        }
    }

    /// Record how run `run_id` ended.
    ///
    /// First writer wins: a run that was already timed out or canceled, or
    /// a stale run of a re-armed task, leaves the record untouched and
    /// returns `false`.
    pub(crate) fn complete(
        &mut self,
        run_id: RunId,
        outcome: Result<Value, TaskFailure>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.state != TaskState::Running || self.current_run != Some(run_id) {
            return false;
        }
        match outcome {
            Ok(value) => {
                self.state = TaskState::Finished;
                self.result = Some(value);
            }
            Err(TaskFailure::Canceled) => {
                self.state = TaskState::Canceled;
            }
            Err(failure) => {
                self.state = TaskState::Error;
                self.exception = Some(failure.message());
                self.traceback = Some(render_traceback(
                    self.id,
                    run_id,
                    &self.callable_ref,
                    &failure,
                ));
            }
        }
        self.settle(now);
        true
    }

    /// Force a running task into `TimedOut` and signal its body.
    pub(crate) fn time_out(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        if let Some(handle) = &self.interrupt {
            handle.interrupt();
        }
        self.state = TaskState::TimedOut;
        self.settle(now);
        true
    }

    /// Put a completed recurring task back to waiting for its next slot.
    pub(crate) fn rearm(&mut self) -> bool {
        if !self.state.is_complete() || !self.will_rearm() {
            return false;
        }
        let Some(finished) = self.finish_time else {
            return false;
        };
        let Some(next) = self.schedule.next_run(self.scheduled_time, finished) else {
            return false;
        };

        self.state = TaskState::Waiting;
        self.scheduled_time = next;
        self.start_time = None;
        self.finish_time = None;
        self.result = None;
        self.exception = None;
        self.traceback = None;
        self.current_run = None;
        self.revision += 1;
        true
    }

    fn settle(&mut self, now: DateTime<Utc>) {
        self.finish_time = Some(now);
        self.interrupt = None;
        self.revision += 1;
    }

    /// Execute the body in place, outside any queue.
    ///
    /// Only a waiting task runs; anything else returns its current state.
    /// Panics and errors end up recorded on the task, never propagated.
    pub async fn run(&mut self) -> TaskState {
        if self.state != TaskState::Waiting {
            return self.state;
        }

        let invocation = self.begin_run(Utc::now());
        let run_id = invocation.run_id();
        let body = invocation.spawn();
        let abort = body.abort_handle();

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, join_body(body)).await {
                Ok(outcome) => {
                    self.complete(run_id, outcome, Utc::now());
                }
                Err(_) => {
                    abort.abort();
                    self.time_out(Utc::now());
                }
            },
            None => {
                let outcome = join_body(body).await;
                self.complete(run_id, outcome, Utc::now());
            }
        }
        self.state
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("callable", &self.callable_ref)
            .field("state", &self.state)
            .field("scheduled_time", &self.scheduled_time)
            .field("run_count", &self.run_count)
            .finish_non_exhaustive()
    }
}
