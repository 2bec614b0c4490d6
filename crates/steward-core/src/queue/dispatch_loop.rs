//! DispatchLoop - キュー 1 つにつき 1 本の実行ループ
//!
//! # 1 tick の流れ
//! 1. timeout した Running を TimedOut にして body を abort
//! 2. 完了した interval タスクを Waiting に戻す
//! 3. retention 切れの完了タスクを表から外す
//! 4. FIFO 順に eligible なタスクを `max_running` まで起動
//! 5. 変化した snapshot を store に渡す
//!
//! 起動した run ごとに `settle_run` が body の終了を待ち、結果を記録する。
//! 停止は watch channel（`shutdown_tx` の drop でも止まる）。

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::fifo::Shared;
use crate::domain::{RunId, TaskFailure, TaskId, TaskState};
use crate::runtime::join_body;

/// Handle to a running dispatch loop.
///
/// Dropping the handle without calling [`shutdown_and_join`](Self::shutdown_and_join)
/// also stops the loop: its shutdown receiver sees the sender go away.
pub struct DispatchLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatchLoop {
    pub(super) fn spawn(shared: Arc<Shared>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(dispatch_loop(shared, shutdown_rx));
        Self { shutdown_tx, join }
    }

    /// Stop admitting tasks. Bodies already running are left to finish.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "dispatch loop panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[instrument(name = "dispatch_loop", skip_all)]
async fn dispatch_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    info!(
        max_running = shared.config.max_running,
        poll_ms = shared.config.poll_interval_ms,
        "dispatch loop started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let sleep_for = tick(&shared).await;

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.notify.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    shared.started.store(false, Ordering::SeqCst);
    info!("dispatch loop stopped");
}

/// One pass over the table: time out, re-arm, evict, admit.
/// Returns how long the loop may sleep before the next pass.
async fn tick(shared: &Arc<Shared>) -> Duration {
    let now = shared.clock.now();
    let config = &shared.config;

    let (changed, next_wake) = {
        let mut state = shared.state.lock().await;

        let mut changed = state.reap_timed_out(now, config.default_timeout());
        changed.extend(state.rearm_recurring());
        state.evict_expired(now, config.completed_retention());

        for (task_id, invocation, snapshot) in state.admit(now, config.running_cap()) {
            let run_id = invocation.run_id();
            let body = invocation.spawn();
            state.track_body(task_id, run_id, body.abort_handle());
            tokio::spawn(settle_run(Arc::clone(shared), task_id, run_id, body));
            changed.push(snapshot);
        }

        (changed, state.next_wake(now, config.default_timeout()))
    };

    shared.persist(changed).await;

    let poll = config.poll_interval();
    next_wake
        .and_then(|at| (at - now).to_std().ok())
        .map_or(poll, |until| until.min(poll))
}

/// Wait for one run's body and record how it ended.
#[instrument(name = "task_run", skip(shared, body), fields(task_id = %task_id, run_id = %run_id))]
async fn settle_run(
    shared: Arc<Shared>,
    task_id: TaskId,
    run_id: RunId,
    body: JoinHandle<Result<Value, TaskFailure>>,
) {
    let outcome = join_body(body).await;

    let snapshot = {
        let mut state = shared.state.lock().await;
        state.untrack_body(task_id, run_id);

        let now = shared.clock.now();
        let Some(task) = state.get_mut(task_id) else {
            debug!("task left the table before its run settled");
            return;
        };
        if !task.complete(run_id, outcome, now) {
            debug!(state = %task.state(), "run already settled");
            return;
        }

        match task.state() {
            TaskState::Finished => info!("task finished"),
            TaskState::Canceled => info!("task canceled"),
            TaskState::Error => warn!(
                exception = task.exception().unwrap_or_default(),
                "task failed"
            ),
            _ => {}
        }
        task.snapshot()
    };

    shared.persist(vec![snapshot]).await;
    // a slot opened up
    shared.notify.notify_one();
}
