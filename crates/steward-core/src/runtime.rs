//! Execution side of a task: the callable it names, the context handed to
//! the body, and the interrupt/progress plumbing shared with the queue.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{Args, CallableRef, Kwargs, RunId, TaskFailure, TaskId};

/// The work a task performs.
///
/// Object-safe so tasks can hold `Arc<dyn Callable>`; the `CallableRef` is the
/// stable, serializable name used for snapshots, status views and duplicate
/// detection.
#[async_trait]
pub trait Callable: Send + Sync {
    fn callable_ref(&self) -> CallableRef;

    async fn call(&self, ctx: &TaskContext, args: &[Value], kwargs: &Kwargs)
    -> Result<Value, TaskFailure>;
}

/// Adapts an async closure into a [`Callable`].
///
/// ```ignore
/// let noop = FnCallable::new(CallableRef::function("noop"), |_ctx, _args, _kwargs| async {
///     Ok(serde_json::Value::Null)
/// });
/// ```
pub struct FnCallable<F> {
    callable_ref: CallableRef,
    f: F,
}

impl<F> FnCallable<F> {
    pub fn new(callable_ref: CallableRef, f: F) -> Self {
        Self { callable_ref, f }
    }
}

#[async_trait]
impl<F, Fut> Callable for FnCallable<F>
where
    F: Fn(TaskContext, Args, Kwargs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskFailure>> + Send,
{
    fn callable_ref(&self) -> CallableRef {
        self.callable_ref.clone()
    }

    async fn call(
        &self,
        ctx: &TaskContext,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<Value, TaskFailure> {
        (self.f)(ctx.clone(), args.to_vec(), kwargs.clone()).await
    }
}

/// Shorthand for `Arc::new(FnCallable::new(..))`.
pub fn callable<F, Fut>(callable_ref: CallableRef, f: F) -> Arc<dyn Callable>
where
    F: Fn(TaskContext, Args, Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskFailure>> + Send + 'static,
{
    Arc::new(FnCallable::new(callable_ref, f))
}

/// Read side of a cancellation request.
///
/// Bodies that want to be cancellable poll [`Interrupter::is_interrupted`]
/// between steps or await [`Interrupter::interrupted`]. A body that never
/// yields can't be interrupted.
#[derive(Debug, Clone)]
pub struct Interrupter {
    rx: watch::Receiver<bool>,
}

impl Interrupter {
    pub fn is_interrupted(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(TaskFailure::Canceled)` once an interrupt was requested, for use
    /// with `?` inside a body.
    pub fn check(&self) -> Result<(), TaskFailure> {
        if self.is_interrupted() {
            Err(TaskFailure::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolves when an interrupt is requested. Never resolves if the
    /// requesting side is gone without asking.
    pub async fn interrupted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Write side of a cancellation request, held by the task while it runs.
#[derive(Debug)]
pub(crate) struct InterruptHandle {
    tx: watch::Sender<bool>,
}

impl InterruptHandle {
    pub(crate) fn interrupt(&self) {
        // send_replace: succeeds even if the body already dropped its receiver
        self.tx.send_replace(true);
    }
}

pub(crate) fn interrupt_pair() -> (InterruptHandle, Interrupter) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle { tx }, Interrupter { rx })
}

/// Latest progress reported by a running body.
///
/// Shared between the task record and the body's context, so status queries
/// see updates while the body is still running.
#[derive(Clone)]
pub struct Progress {
    cell: Arc<watch::Sender<Option<Value>>>,
}

impl Progress {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { cell: Arc::new(tx) }
    }

    pub fn report(&self, value: Value) {
        self.cell.send_replace(Some(value));
    }

    pub fn current(&self) -> Option<Value> {
        self.cell.borrow().clone()
    }

    pub(crate) fn set(&self, value: Option<Value>) {
        self.cell.send_replace(value);
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Progress").field(&self.current()).finish()
    }
}

/// Handed to a body for the duration of one run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    run_id: RunId,
    interrupter: Interrupter,
    progress: Progress,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        run_id: RunId,
        interrupter: Interrupter,
        progress: Progress,
    ) -> Self {
        Self {
            task_id,
            run_id,
            interrupter,
            progress,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }

    pub fn report_progress(&self, value: Value) {
        self.progress.report(value);
    }
}

/// Everything a worker needs to execute one run, detached from the task
/// table so no lock is held while the body runs.
pub(crate) struct Invocation {
    pub(crate) callable: Arc<dyn Callable>,
    pub(crate) args: Args,
    pub(crate) kwargs: Kwargs,
    pub(crate) ctx: TaskContext,
}

impl Invocation {
    pub(crate) fn run_id(&self) -> RunId {
        self.ctx.run_id
    }

    /// Run the body until it returns or an interrupt is observed.
    pub(crate) async fn execute(self) -> Result<Value, TaskFailure> {
        let interrupter = self.ctx.interrupter.clone();
        tokio::select! {
            biased;
            () = interrupter.interrupted() => Err(TaskFailure::Canceled),
            res = self.callable.call(&self.ctx, &self.args, &self.kwargs) => res,
        }
    }

    /// Execute on its own tokio task so a panic is contained and the run
    /// can be aborted from outside.
    pub(crate) fn spawn(self) -> JoinHandle<Result<Value, TaskFailure>> {
        tokio::spawn(self.execute())
    }
}

/// Wait for a spawned body, mapping join failures into task failures.
pub(crate) async fn join_body(body: JoinHandle<Result<Value, TaskFailure>>) -> Result<Value, TaskFailure> {
    match body.await {
        Ok(res) => res,
        Err(err) if err.is_cancelled() => Err(TaskFailure::Canceled),
        Err(err) => {
            let panic = err.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic payload>".to_string());
            Err(TaskFailure::msg(format!("task panicked: {message}")))
        }
    }
}
