mod common;

use std::sync::Arc;

use serde_json::json;
use steward_core::StewardError;
use steward_core::content::{
    ContainerConfig, ContentUnit, Dispatcher, DispatcherConfig, HandlerContainer, Options,
};

use common::{deployed_container, register_mocks, write_descriptor, zsh_and_ksh};

#[tokio::test]
async fn container_finds_loaded_types_only() {
    let (_dir, container) = deployed_container();
    assert!(container.find("rpm").is_some());
    assert!(container.find("xxx").is_none());
    assert_eq!(container.type_ids(), vec!["deb", "rpm", "system"]);
}

#[tokio::test]
async fn install_counts_changes_without_reboot() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::new(container);

    let report = dispatcher.install(&zsh_and_ksh(), &Options::default()).await.unwrap();

    assert!(report.status);
    assert_eq!(report.chgcnt, 2);
    assert!(!report.reboot.scheduled);
    assert_eq!(report.details["rpm"].details, json!({ "installed": ["zsh", "ksh"] }));
}

#[tokio::test]
async fn install_with_reboot_option_schedules_reboot() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::new(container);

    let report = dispatcher
        .install(&[ContentUnit::named("rpm", "zsh")], &Options::default().with_reboot())
        .await
        .unwrap();

    assert!(report.status);
    assert_eq!(report.chgcnt, 1);
    assert!(report.reboot.scheduled);
    assert_eq!(report.reboot.details, json!({ "minutes": 1 }));
}

#[tokio::test]
async fn update_and_uninstall_report_changes() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::new(container);

    let updated = dispatcher.update(&zsh_and_ksh(), &Options::default()).await.unwrap();
    assert!(updated.status);
    assert_eq!(updated.chgcnt, 2);

    let removed = dispatcher
        .uninstall(&[ContentUnit::named("rpm", "zsh")], &Options::default())
        .await
        .unwrap();
    assert!(removed.status);
    assert_eq!(removed.chgcnt, 1);
}

#[tokio::test]
async fn profile_and_reboot_change_nothing() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::new(container);

    let profile = dispatcher.profile(&["rpm".to_string()]).await;
    assert!(profile.status);
    assert_eq!(profile.chgcnt, 0);

    let reboot = dispatcher.reboot().await;
    assert!(reboot.status);
    assert_eq!(reboot.chgcnt, 0);
    assert!(reboot.reboot.scheduled);
}

#[tokio::test]
async fn missing_handler_fails_its_group_only() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::new(container);
    let mut units = zsh_and_ksh();
    units.push(ContentUnit::named("puppet", "apache"));

    let report = dispatcher.install(&units, &Options::default()).await.unwrap();

    assert!(!report.status);
    assert_eq!(report.chgcnt, 2);
    assert!(report.details["rpm"].status);
    assert!(!report.details["puppet"].status);
}

#[tokio::test]
async fn handler_errors_are_captured_per_group() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::new(container);
    let units = vec![ContentUnit::named("deb", "vim"), ContentUnit::named("rpm", "zsh")];

    let report = dispatcher.install(&units, &Options::default()).await.unwrap();

    assert!(!report.status);
    assert_eq!(report.chgcnt, 1);
    assert_eq!(
        report.details["deb"].details,
        json!({ "message": "transaction check failed" })
    );
}

#[tokio::test]
async fn malformed_unit_rejects_whole_batch() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::new(container);
    let units = vec![ContentUnit::named("rpm", "zsh"), ContentUnit::named("", "ksh")];

    let err = dispatcher.install(&units, &Options::default()).await.unwrap_err();
    assert!(matches!(err, StewardError::MalformedUnit { index: 1, .. }));
}

#[tokio::test]
async fn reboot_without_system_handler_is_not_scheduled() {
    let (_dir, container) = deployed_container();
    let dispatcher = Dispatcher::with_config(
        container,
        DispatcherConfig {
            system_type: "os".into(),
        },
    );

    let report = dispatcher
        .install(&[ContentUnit::named("rpm", "zsh")], &Options::default().with_reboot())
        .await
        .unwrap();
    assert!(report.status);
    assert!(!report.reboot.scheduled);

    let reboot = dispatcher.reboot().await;
    assert!(!reboot.status);
}

#[tokio::test]
async fn reload_swaps_handlers_under_a_live_dispatcher() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "rpm.json", "packages", &["rpm"]);
    let mut container =
        HandlerContainer::new(ContainerConfig::default().with_location(dir.path()));
    register_mocks(&mut container);
    container.load();
    let container = Arc::new(container);
    let dispatcher = Dispatcher::new(Arc::clone(&container));

    assert!(dispatcher.install(&zsh_and_ksh(), &Options::default()).await.unwrap().status);

    std::fs::remove_file(dir.path().join("rpm.json")).unwrap();
    write_descriptor(dir.path(), "rpm.json", "broken", &["rpm"]);
    container.load();

    let report = dispatcher.install(&zsh_and_ksh(), &Options::default()).await.unwrap();
    assert!(!report.status);
}
