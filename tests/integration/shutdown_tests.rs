//! Scheduler shutdown and drop behavior.

use std::time::Duration;

use install_queue::{Scheduler, TaskStatus};

use super::test_helpers::{
    item_script_builder, test_config, wait_for_status, SCRIPT_PROVIDER, WAIT_LIMIT,
};

#[tokio::test]
async fn shutdown_stops_loop_and_leaves_status_untouched() {
    let scheduler = Scheduler::new(&test_config(1));
    scheduler.register_builder(SCRIPT_PROVIDER, item_script_builder());
    let loop_handle = scheduler.start();

    let running = scheduler
        .store()
        .enqueue("exec sleep 30", "running", SCRIPT_PROVIDER, "/tmp")
        .unwrap();
    wait_for_status(&scheduler, &running.id, TaskStatus::Downloading).await;
    let waiting = scheduler
        .store()
        .enqueue("exit 0", "waiting", SCRIPT_PROVIDER, "/tmp")
        .unwrap();

    scheduler.shutdown();
    assert!(scheduler.is_shut_down());
    tokio::time::timeout(WAIT_LIMIT, loop_handle)
        .await
        .expect("loop stops")
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        scheduler.store().get(&running.id).unwrap().status,
        TaskStatus::Downloading
    );
    assert_eq!(
        scheduler.store().get(&waiting.id).unwrap().status,
        TaskStatus::Queued
    );
    assert_eq!(scheduler.admit_queued(), 0);
}

#[tokio::test]
async fn dropping_scheduler_stops_loop() {
    let scheduler = Scheduler::new(&test_config(1));
    let loop_handle = scheduler.start();
    drop(scheduler);

    tokio::time::timeout(WAIT_LIMIT, loop_handle)
        .await
        .expect("loop stops")
        .unwrap();
}

#[tokio::test]
async fn from_config_registers_enabled_providers() {
    let mut config = test_config(1);
    config.providers.amazon.enabled = false;
    let scheduler = Scheduler::from_config(&config);

    assert_eq!(scheduler.store().providers(), vec!["epic", "gog"]);
    assert!(!scheduler.store().has_builder("amazon"));
    assert_eq!(scheduler.max_workers(), 1);
}
