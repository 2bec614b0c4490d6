//! In-memory FIFO task queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use super::config::QueueConfig;
use super::criteria::{self, Criteria};
use super::dispatch_loop::DispatchLoop;
use super::TaskQueue;
use crate::domain::{RestoredTask, RunId, Task, TaskId, TaskSnapshot, TaskState, TaskStatus};
use crate::error::{Result, StewardError};
use crate::observability::QueueCounts;
use crate::ports::{Clock, SnapshotStore, SystemClock};
use crate::runtime::Invocation;

/// Task table plus run bookkeeping. Only touched under `Shared::state`.
#[derive(Default)]
pub(crate) struct QueueState {
    tasks: HashMap<TaskId, Task>,

    /// Enqueue order. Dispatch walks this front to back.
    order: VecDeque<TaskId>,

    /// Abort handles of bodies currently executing, tagged with their run.
    bodies: HashMap<TaskId, (RunId, AbortHandle)>,
}

impl QueueState {
    fn insert(&mut self, task: Task) {
        self.order.push_back(task.id());
        self.tasks.insert(task.id(), task);
    }

    fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// A stored task that makes `candidate` redundant: the same id, or the
    /// same call that has not completed yet.
    fn find_duplicate(&self, candidate: &Task) -> Option<&Task> {
        if let Some(existing) = self.tasks.get(&candidate.id()) {
            return Some(existing);
        }
        self.iter()
            .find(|t| !t.state().is_complete() && t.same_call(candidate))
    }

    fn counts(&self) -> QueueCounts {
        self.tasks.values().map(Task::state).collect()
    }

    fn running(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.state() == TaskState::Running)
            .count()
    }

    pub(crate) fn track_body(&mut self, id: TaskId, run_id: RunId, abort: AbortHandle) {
        self.bodies.insert(id, (run_id, abort));
    }

    pub(crate) fn untrack_body(&mut self, id: TaskId, run_id: RunId) {
        if self.bodies.get(&id).is_some_and(|(run, _)| *run == run_id) {
            self.bodies.remove(&id);
        }
    }

    /// Force running tasks past their deadline into `TimedOut`.
    pub(crate) fn reap_timed_out(
        &mut self,
        now: DateTime<Utc>,
        default_timeout: Option<Duration>,
    ) -> Vec<TaskSnapshot> {
        let mut changed = Vec::new();
        for id in &self.order {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            let Some(deadline) = task.deadline(default_timeout) else {
                continue;
            };
            if deadline > now || !task.time_out(now) {
                continue;
            }
            if let Some((_, abort)) = self.bodies.remove(id) {
                abort.abort();
            }
            warn!(task_id = %id, callable = %task.callable_ref(), "task timed out");
            changed.push(task.snapshot());
        }
        changed
    }

    /// Send completed recurring tasks back to waiting.
    pub(crate) fn rearm_recurring(&mut self) -> Vec<TaskSnapshot> {
        let mut changed = Vec::new();
        for task in self.tasks.values_mut() {
            if task.rearm() {
                debug!(
                    task_id = %task.id(),
                    next_run = %task.scheduled_time(),
                    "recurring task re-armed"
                );
                changed.push(task.snapshot());
            }
        }
        changed
    }

    /// Drop completed tasks whose retention has lapsed.
    pub(crate) fn evict_expired(
        &mut self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Vec<TaskId> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Vec::new();
        };
        let expired: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state().is_complete() && !t.will_rearm())
            .filter(|t| {
                t.finish_time()
                    .and_then(|f| f.checked_add_signed(retention))
                    .is_some_and(|until| until <= now)
            })
            .map(Task::id)
            .collect();

        if !expired.is_empty() {
            for id in &expired {
                self.tasks.remove(id);
            }
            self.order.retain(|id| self.tasks.contains_key(id));
            debug!(count = expired.len(), "evicted completed tasks");
        }
        expired
    }

    /// Start eligible waiting tasks, oldest first, up to `cap` running.
    pub(crate) fn admit(
        &mut self,
        now: DateTime<Utc>,
        cap: usize,
    ) -> Vec<(TaskId, Invocation, TaskSnapshot)> {
        let mut running = self.running();
        let mut started = Vec::new();
        for id in &self.order {
            if running >= cap {
                break;
            }
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            if !task.is_eligible(now) {
                continue;
            }
            let invocation = task.begin_run(now);
            info!(
                task_id = %id,
                run_id = %invocation.run_id(),
                callable = %task.callable_ref(),
                "task started"
            );
            started.push((*id, invocation, task.snapshot()));
            running += 1;
        }
        started
    }

    /// Earliest future instant at which a waiting task becomes eligible or a
    /// running one hits its deadline.
    pub(crate) fn next_wake(
        &self,
        now: DateTime<Utc>,
        default_timeout: Option<Duration>,
    ) -> Option<DateTime<Utc>> {
        self.tasks
            .values()
            .filter_map(|t| match t.state() {
                TaskState::Waiting => Some(t.scheduled_time()),
                TaskState::Running => t.deadline(default_timeout),
                _ => None,
            })
            .filter(|at| *at > now)
            .min()
    }
}

/// State shared by queue handles, the dispatch loop and run watchers.
pub(crate) struct Shared {
    pub(crate) state: Mutex<QueueState>,
    pub(crate) notify: Notify,
    pub(crate) config: QueueConfig,
    pub(crate) clock: Arc<dyn Clock>,
    store: Option<Arc<dyn SnapshotStore>>,
    pub(crate) started: AtomicBool,
}

impl Shared {
    /// Hand snapshots to the store, if any. Never fails the caller.
    pub(crate) async fn persist(&self, snapshots: Vec<TaskSnapshot>) {
        let Some(store) = &self.store else {
            return;
        };
        for snapshot in snapshots {
            if let Err(err) = store.save(&snapshot).await {
                warn!(task_id = %snapshot.id, error = %err, "failed to save task snapshot");
            }
        }
    }
}

/// FIFO queue of [`Task`]s, executed by a single dispatch loop.
///
/// Cheap to clone; all clones share the same table. Enqueue works before
/// [`start`](Self::start); nothing runs until the loop is started.
///
/// ```ignore
/// let queue = FifoTaskQueue::new(QueueConfig::default());
/// let dispatch = queue.start()?;
/// let status = queue.enqueue(task, true).await?;
/// // ...
/// dispatch.shutdown_and_join().await;
/// ```
#[derive(Clone)]
pub struct FifoTaskQueue {
    shared: Arc<Shared>,
}

impl FifoTaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: QueueConfig) -> FifoTaskQueueBuilder {
        FifoTaskQueueBuilder {
            config,
            clock: Arc::new(SystemClock),
            store: None,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Spawn the dispatch loop. At most one loop runs per queue.
    pub fn start(&self) -> Result<DispatchLoop> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(StewardError::AlreadyStarted);
        }
        Ok(DispatchLoop::spawn(Arc::clone(&self.shared)))
    }

    /// Nudge the dispatch loop to re-evaluate now.
    pub fn wake(&self) {
        self.shared.notify.notify_one();
    }

    pub async fn get(&self, id: TaskId) -> Option<TaskStatus> {
        self.shared.state.lock().await.tasks.get(&id).map(Task::status)
    }

    /// Every task, in enqueue order.
    pub async fn all(&self) -> Vec<TaskStatus> {
        self.shared.state.lock().await.iter().map(Task::status).collect()
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Tasks recorded in the snapshot store, including evicted ones.
    pub async fn history(&self) -> Result<Vec<RestoredTask>> {
        let Some(store) = &self.shared.store else {
            return Ok(Vec::new());
        };
        Ok(store
            .load_all()
            .await?
            .iter()
            .map(TaskSnapshot::restore)
            .collect())
    }
}

#[async_trait]
impl TaskQueue for FifoTaskQueue {
    #[instrument(skip(self, task), fields(task_id = %task.id(), callable = %task.callable_ref()))]
    async fn enqueue(&self, mut task: Task, unique: bool) -> Result<TaskStatus> {
        task.schedule_policy().validate()?;
        task.enqueued_at(self.shared.clock.now());

        let (status, snapshot) = {
            let mut state = self.shared.state.lock().await;
            if unique && let Some(existing) = state.find_duplicate(&task) {
                debug!(existing = %existing.id(), "equivalent task already queued");
                return Ok(existing.status());
            }
            if !unique && state.tasks.contains_key(&task.id()) {
                debug!("task id already queued");
                return Ok(state.tasks[&task.id()].status());
            }
            let status = task.status();
            let snapshot = task.snapshot();
            state.insert(task);
            (status, snapshot)
        };

        debug!(scheduled_time = %status.scheduled_time, "task enqueued");
        self.shared.persist(vec![snapshot]).await;
        self.wake();
        Ok(status)
    }

    async fn find(&self, criteria: &Criteria) -> Vec<TaskStatus> {
        let terms = match criteria.resolve() {
            Ok(terms) => terms,
            Err(err) => {
                debug!(error = %err, "find with unknown field matches nothing");
                return Vec::new();
            }
        };
        let state = self.shared.state.lock().await;
        state
            .iter()
            .filter(|t| criteria::matches(t, &terms))
            .map(Task::status)
            .collect()
    }

    async fn exists(&self, task: &Task, fields: &[&str]) -> Result<bool> {
        let fields = criteria::parse_fields(fields)?;
        let state = self.shared.state.lock().await;
        Ok(state.iter().any(|t| criteria::agree_on(t, task, &fields)))
    }

    #[instrument(skip(self))]
    async fn cancel(&self, id: TaskId) -> Result<TaskStatus> {
        let (status, snapshot) = {
            let mut state = self.shared.state.lock().await;
            let task = state.get_mut(id).ok_or(StewardError::TaskNotFound(id))?;
            let before = task.state();
            if !task.cancel(self.shared.clock.now()) {
                debug!(state = %before, "task already complete; cancel ignored");
                return Ok(task.status());
            }
            info!(from = %before, "cancel requested");
            (task.status(), task.snapshot())
        };

        self.shared.persist(vec![snapshot]).await;
        self.wake();
        Ok(status)
    }

    async fn status(&self, id: TaskId) -> Result<TaskStatus> {
        self.get(id).await.ok_or(StewardError::TaskNotFound(id))
    }

    async fn counts(&self) -> QueueCounts {
        self.shared.state.lock().await.counts()
    }
}

pub struct FifoTaskQueueBuilder {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl FifoTaskQueueBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> FifoTaskQueue {
        FifoTaskQueue {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                config: self.config,
                clock: self.clock,
                store: self.store,
                started: AtomicBool::new(false),
            }),
        }
    }
}
