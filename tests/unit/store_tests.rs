//! Unit tests for the task store: enqueue, operator commands, admission,
//! and run bookkeeping. No processes are spawned here.

use install_queue::{
    command_builder, AppError, ProcessInvocation, ProgressUpdate, TaskStatus, TaskStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

fn store_with_builder() -> TaskStore {
    let store = TaskStore::new(64);
    store.register_builder(
        "gog",
        command_builder(|item_id, _| ProcessInvocation::new("true").arg(item_id)),
    );
    store
}

#[test]
fn enqueue_appends_to_queue_tail() {
    let store = store_with_builder();
    let a = store.enqueue("a", "A", "gog", "/games").unwrap();
    let b = store.enqueue("b", "B", "gog", "/games").unwrap();

    assert_eq!(a.status, TaskStatus::Queued);
    assert_eq!(store.queued_ids(), vec![a.id.clone(), b.id.clone()]);
    assert_eq!(store.list().len(), 2);
    assert_eq!(store.list_active().len(), 2);
}

#[test]
fn duplicate_active_task_is_rejected() {
    let store = store_with_builder();
    store.enqueue("a", "A", "gog", "/games").unwrap();

    let err = store.enqueue("a", "A again", "gog", "/other").unwrap_err();
    assert!(matches!(err, AppError::Duplicate(_)));
    assert_eq!(store.queue_len(), 1);
}

#[test]
fn same_item_on_another_provider_is_allowed() {
    let store = store_with_builder();
    store.enqueue("a", "A", "gog", "/games").unwrap();
    assert!(store.enqueue("a", "A", "epic", "/games").is_ok());
}

#[test]
fn terminal_task_does_not_block_reenqueue() {
    let store = store_with_builder();
    let first = store.enqueue("a", "A", "gog", "/games").unwrap();
    store.cancel(&first.id).unwrap();

    let second = store.enqueue("a", "A", "gog", "/games").unwrap();
    assert_ne!(first.id, second.id);
}

#[test]
fn paused_task_blocks_duplicate() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let _ = store.take_admissions(1, &CancellationToken::new());
    store.pause(&task.id).unwrap();

    let err = store.enqueue("a", "A", "gog", "/games").unwrap_err();
    assert!(matches!(err, AppError::Duplicate(_)));
}

#[test]
fn unknown_ids_are_not_found() {
    let store = store_with_builder();
    for result in [
        store.get("missing"),
        store.pause("missing"),
        store.resume("missing"),
        store.cancel("missing"),
        store.remove("missing"),
    ] {
        assert_eq!(
            result.unwrap_err(),
            AppError::NotFound("task not found: missing".into())
        );
    }
}

#[test]
fn admission_respects_worker_limit() {
    let store = store_with_builder();
    for item in ["a", "b", "c"] {
        store.enqueue(item, item, "gog", "/games").unwrap();
    }

    let admitted = store.take_admissions(2, &CancellationToken::new());
    assert_eq!(admitted.len(), 2);
    assert_eq!(admitted[0].item_id, "a");
    assert_eq!(admitted[1].item_id, "b");
    assert_eq!(admitted[0].attempt, 1);
    assert_eq!(store.running_count(), 2);
    assert_eq!(store.queue_len(), 1);

    assert!(store.take_admissions(2, &CancellationToken::new()).is_empty());

    let running = store.get(&admitted[0].task_id).unwrap();
    assert_eq!(running.status, TaskStatus::Downloading);
    assert!(running.started_at.is_some());
}

#[test]
fn missing_builder_fails_without_using_a_slot() {
    let store = store_with_builder();
    let orphan = store.enqueue("a", "A", "itch", "/games").unwrap();
    let next = store.enqueue("b", "B", "gog", "/games").unwrap();

    let admitted = store.take_admissions(1, &CancellationToken::new());
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].task_id, next.id);

    let failed = store.get(&orphan.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("no command builder registered for provider: itch")
    );
    assert_eq!(store.queue_len(), 0);
}

#[test]
fn cancelled_queued_task_is_never_admitted() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    store.cancel(&task.id).unwrap();

    assert_eq!(store.queue_len(), 0);
    assert!(store.take_admissions(2, &CancellationToken::new()).is_empty());
    assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Cancelled);
}

#[test]
fn pause_only_from_downloading() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();

    let err = store.pause(&task.id).unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
    assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Queued);
}

#[test]
fn pause_signals_the_run_and_clears_speed() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let admission = store
        .take_admissions(1, &CancellationToken::new())
        .pop()
        .unwrap();
    store.apply_progress(
        &task.id,
        admission.attempt,
        &ProgressUpdate {
            speed_bps: Some(1_000),
            ..ProgressUpdate::default()
        },
    );

    let paused = store.pause(&task.id).unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert_eq!(paused.speed_bps, 0);
    assert!(admission.cancel.is_cancelled());
    assert_eq!(store.running_count(), 0);
}

#[test]
fn resume_only_from_paused_and_requeues_at_tail() {
    let store = store_with_builder();
    let a = store.enqueue("a", "A", "gog", "/games").unwrap();
    let _ = store.take_admissions(1, &CancellationToken::new());
    let b = store.enqueue("b", "B", "gog", "/games").unwrap();

    assert!(matches!(
        store.resume(&a.id).unwrap_err(),
        AppError::InvalidTransition(_)
    ));

    store.pause(&a.id).unwrap();
    let resumed = store.resume(&a.id).unwrap();
    assert_eq!(resumed.status, TaskStatus::Queued);
    assert_eq!(store.queued_ids(), vec![b.id, a.id]);
}

#[test]
fn cancel_terminal_task_is_invalid() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    store.cancel(&task.id).unwrap();

    let err = store.cancel(&task.id).unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

#[test]
fn cancel_paused_task() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let _ = store.take_admissions(1, &CancellationToken::new());
    store.pause(&task.id).unwrap();

    let cancelled = store.cancel(&task.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
}

#[test]
fn remove_requires_terminal_status() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();

    let err = store.remove(&task.id).unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    store.cancel(&task.id).unwrap();
    let removed = store.remove(&task.id).unwrap();
    assert_eq!(removed.id, task.id);
    assert!(store.get(&task.id).is_err());
}

#[test]
fn finish_run_records_success() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let admission = store
        .take_admissions(1, &CancellationToken::new())
        .pop()
        .unwrap();

    store.finish_run(&task.id, admission.attempt, Ok(()), &admission.cancel);

    let done = store.get(&task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!((done.progress - 100.0).abs() < f64::EPSILON);
    assert!(done.completed_at.is_some());
    assert!(done.error.is_none());
    assert_eq!(store.running_count(), 0);
}

#[test]
fn finish_run_records_failure_message() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let admission = store
        .take_admissions(1, &CancellationToken::new())
        .pop()
        .unwrap();

    let err = AppError::Process("process exited with code 3".into());
    store.finish_run(&task.id, admission.attempt, Err(err), &admission.cancel);

    let failed = store.get(&task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("process: process exited with code 3")
    );
}

#[test]
fn finish_after_cancel_keeps_cancelled() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let admission = store
        .take_admissions(1, &CancellationToken::new())
        .pop()
        .unwrap();

    store.cancel(&task.id).unwrap();
    let err = AppError::Process("process terminated by signal".into());
    store.finish_run(&task.id, admission.attempt, Err(err), &admission.cancel);

    assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Cancelled);
}

#[test]
fn stale_attempt_output_is_ignored() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let parent = CancellationToken::new();
    let first = store.take_admissions(1, &parent).pop().unwrap();
    store.pause(&task.id).unwrap();
    store.resume(&task.id).unwrap();
    let second = store.take_admissions(1, &parent).pop().unwrap();
    assert_eq!(second.attempt, first.attempt + 1);

    store.apply_progress(
        &task.id,
        first.attempt,
        &ProgressUpdate {
            percent: Some(90.0),
            ..ProgressUpdate::default()
        },
    );
    store.finish_run(
        &task.id,
        first.attempt,
        Err(AppError::Process("old run".into())),
        &CancellationToken::new(),
    );

    let current = store.get(&task.id).unwrap();
    assert_eq!(current.status, TaskStatus::Downloading);
    assert!(current.progress.abs() < f64::EPSILON);
}

#[test]
fn progress_applies_to_current_run() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let admission = store
        .take_admissions(1, &CancellationToken::new())
        .pop()
        .unwrap();

    store.apply_progress(
        &task.id,
        admission.attempt,
        &ProgressUpdate {
            percent: Some(12.5),
            downloaded_bytes: Some(100),
            total_bytes: Some(800),
            ..ProgressUpdate::default()
        },
    );

    let current = store.get(&task.id).unwrap();
    assert!((current.progress - 12.5).abs() < f64::EPSILON);
    assert_eq!(current.downloaded_bytes, 100);
    assert_eq!(current.total_bytes, 800);
}

#[test]
fn shutdown_token_cancels_admitted_runs() {
    let store = store_with_builder();
    store.enqueue("a", "A", "gog", "/games").unwrap();
    let parent = CancellationToken::new();
    let admission = store.take_admissions(1, &parent).pop().unwrap();

    parent.cancel();
    assert!(admission.cancel.is_cancelled());
}

#[tokio::test]
async fn every_mutation_is_broadcast() {
    let store = store_with_builder();
    let mut updates = store.subscribe();

    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let _ = store.take_admissions(1, &CancellationToken::new());
    store.pause(&task.id).unwrap();
    store.resume(&task.id).unwrap();
    store.cancel(&task.id).unwrap();

    let mut statuses = Vec::new();
    while let Some(snapshot) = updates.try_recv() {
        statuses.push(snapshot.status);
    }
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Queued,
            TaskStatus::Downloading,
            TaskStatus::Paused,
            TaskStatus::Queued,
            TaskStatus::Cancelled,
        ]
    );
}

#[test]
fn rejected_transition_leaves_status_unchanged() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let admission = store
        .take_admissions(1, &CancellationToken::new())
        .pop()
        .unwrap();
    store.finish_run(&task.id, admission.attempt, Ok(()), &admission.cancel);

    assert_eq!(
        store.cancel(&task.id).unwrap_err(),
        AppError::InvalidTransition(format!(
            "task {} cannot move from Completed to Cancelled",
            task.id
        ))
    );
    assert!(matches!(
        store.pause(&task.id).unwrap_err(),
        AppError::InvalidTransition(_)
    ));
    assert!(matches!(
        store.resume(&task.id).unwrap_err(),
        AppError::InvalidTransition(_)
    ));
    assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Completed);
}

#[test]
fn second_exit_for_same_run_is_ignored() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let admission = store
        .take_admissions(1, &CancellationToken::new())
        .pop()
        .unwrap();

    store.finish_run(&task.id, admission.attempt, Ok(()), &admission.cancel);
    let err = AppError::Process("process exited with code 1".into());
    store.finish_run(&task.id, admission.attempt, Err(err), &admission.cancel);

    let done = store.get(&task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.error.is_none());
}

#[test]
fn pausing_twice_is_rejected() {
    let store = store_with_builder();
    let task = store.enqueue("a", "A", "gog", "/games").unwrap();
    let _ = store.take_admissions(1, &CancellationToken::new());
    store.pause(&task.id).unwrap();

    let err = store.pause(&task.id).unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
    assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Paused);
}

#[test]
fn broadcast_status_changes_follow_lifecycle_table() {
    let store = TaskStore::new(4096);
    store.register_builder(
        "gog",
        command_builder(|item_id, _| ProcessInvocation::new("true").arg(item_id)),
    );
    let mut updates = store.subscribe();
    let parent = CancellationToken::new();
    let mut rng = StdRng::seed_from_u64(0x7ab1e);

    let mut ids = Vec::new();
    for item in ["a", "b", "c", "d"] {
        ids.push(store.enqueue(item, item, "gog", "/games").unwrap().id);
    }
    ids.push(store.enqueue("e", "E", "amazon", "/games").unwrap().id);

    for _ in 0..200 {
        let id = &ids[rng.gen_range(0..ids.len())];
        match rng.gen_range(0..6) {
            0 => {
                let _ = store.pause(id);
            }
            1 => {
                let _ = store.resume(id);
            }
            2 => {
                let _ = store.cancel(id);
            }
            3 => {
                let current = store.get(id).unwrap();
                let outcome = if rng.gen_bool(0.5) {
                    Ok(())
                } else {
                    Err(AppError::Process("process exited with code 2".into()))
                };
                store.finish_run(id, current.attempt, outcome, &CancellationToken::new());
            }
            _ => {
                let _ = store.take_admissions(2, &parent);
            }
        }
        assert!(store.running_count() <= 2);
    }

    let mut last = std::collections::HashMap::new();
    while let Some(snapshot) = updates.try_recv() {
        if let Some(previous) = last.insert(snapshot.id.clone(), snapshot.status) {
            assert!(
                previous == snapshot.status || previous.can_transition_to(snapshot.status),
                "{previous:?} -> {:?} for {}",
                snapshot.status,
                snapshot.id
            );
        }
    }
    assert!(!last.is_empty());
    assert_eq!(store.notifier().dropped(), 0);
}
