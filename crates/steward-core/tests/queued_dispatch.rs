//! Dispatcher operations carried through the task queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use steward_core::content::{ContentUnit, DispatchRequest, Dispatcher, Options, Report};
use steward_core::impls::FileSnapshotStore;
use steward_core::ports::SnapshotStore;
use steward_core::{Criteria, FifoTaskQueue, QueueConfig, TaskId, TaskQueue, TaskState, TaskStatus};

use common::{deployed_container, zsh_and_ksh};

async fn settle(queue: &FifoTaskQueue, id: TaskId) -> TaskStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = queue.status(id).await.unwrap();
        if status.state.is_complete() {
            return status;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn queue_config() -> QueueConfig {
    QueueConfig::default().with_poll_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn install_task_stores_report_as_result() {
    let (_dir, container) = deployed_container();
    let dispatcher = Arc::new(Dispatcher::new(container));
    let queue = FifoTaskQueue::new(queue_config());
    let dispatch = queue.start().unwrap();

    let task = dispatcher
        .task(DispatchRequest::install(zsh_and_ksh(), Options::default()))
        .unwrap();
    let status = queue.enqueue(task, true).await.unwrap();
    assert_eq!(status.class_name.as_deref(), Some("Dispatcher"));
    assert_eq!(status.method_name, "install");

    let done = settle(&queue, status.id).await;
    assert_eq!(done.state, TaskState::Finished);
    let report: Report = serde_json::from_value(done.result.unwrap()).unwrap();
    assert!(report.status);
    assert_eq!(report.chgcnt, 2);

    dispatch.shutdown_and_join().await;
}

#[tokio::test]
async fn equal_requests_are_deduplicated() {
    let (_dir, container) = deployed_container();
    let dispatcher = Arc::new(Dispatcher::new(container));
    let queue = FifoTaskQueue::new(queue_config());

    let request = DispatchRequest::install(zsh_and_ksh(), Options::default());
    let first = queue.enqueue(dispatcher.task(request.clone()).unwrap(), true).await.unwrap();
    let second = queue.enqueue(dispatcher.task(request).unwrap(), true).await.unwrap();
    assert_eq!(first.id, second.id);

    let other = DispatchRequest::install(zsh_and_ksh(), Options::default().with_reboot());
    let third = queue.enqueue(dispatcher.task(other).unwrap(), true).await.unwrap();
    assert_ne!(third.id, first.id);

    let installs = queue.find(&Criteria::new().with("method_name", "install")).await;
    assert_eq!(installs.len(), 2);
}

#[tokio::test]
async fn profile_and_reboot_tasks_finish() {
    let (_dir, container) = deployed_container();
    let dispatcher = Arc::new(Dispatcher::new(container));
    let queue = FifoTaskQueue::new(queue_config());
    let dispatch = queue.start().unwrap();

    let profile = dispatcher
        .task(DispatchRequest::Profile { type_ids: vec!["rpm".into()] })
        .unwrap();
    let reboot = dispatcher.task(DispatchRequest::Reboot).unwrap();
    let profile = queue.enqueue(profile, false).await.unwrap();
    let reboot = queue.enqueue(reboot, false).await.unwrap();

    let profile = settle(&queue, profile.id).await;
    let reboot = settle(&queue, reboot.id).await;
    assert_eq!(profile.result.unwrap()["chgcnt"], json!(0));
    assert_eq!(reboot.result.unwrap()["reboot"]["scheduled"], json!(true));

    dispatch.shutdown_and_join().await;
}

#[tokio::test]
async fn malformed_batch_fails_the_task() {
    let (_dir, container) = deployed_container();
    let dispatcher = Arc::new(Dispatcher::new(container));
    let queue = FifoTaskQueue::new(queue_config());
    let dispatch = queue.start().unwrap();

    let task = dispatcher
        .task(DispatchRequest::install(
            vec![ContentUnit::named("", "zsh")],
            Options::default(),
        ))
        .unwrap();
    let status = queue.enqueue(task, false).await.unwrap();

    let failed = settle(&queue, status.id).await;
    assert_eq!(failed.state, TaskState::Error);
    assert!(failed.exception.unwrap().contains("malformed content unit"));
    assert!(failed.traceback.unwrap().contains("Dispatcher.install"));

    dispatch.shutdown_and_join().await;
}

#[tokio::test]
async fn history_survives_in_file_store() {
    let (_dir, container) = deployed_container();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSnapshotStore::open(store_dir.path()).await.unwrap());
    let dispatcher = Arc::new(Dispatcher::new(container));

    let queue = FifoTaskQueue::builder(queue_config()).store(store.clone()).build();
    let dispatch = queue.start().unwrap();
    let task = dispatcher
        .task(DispatchRequest::uninstall(vec![ContentUnit::named("rpm", "zsh")], Options::default()))
        .unwrap();
    let status = queue.enqueue(task, false).await.unwrap();
    settle(&queue, status.id).await;
    dispatch.shutdown_and_join().await;

    // wait for the final snapshot write
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let saved = store.load(status.id).await.unwrap();
        if saved.is_some_and(|s| s.state == TaskState::Finished) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let reopened = FileSnapshotStore::open(store_dir.path()).await.unwrap();
    let restored: Vec<_> = reopened
        .load_all()
        .await
        .unwrap()
        .iter()
        .map(|s| s.restore())
        .collect();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].id(), status.id);
    assert_eq!(restored[0].state(), TaskState::Finished);
    assert_eq!(restored[0].result().unwrap()["chgcnt"], json!(1));
    assert_eq!(restored[0].callable_ref().to_string(), "Dispatcher.uninstall");
}
