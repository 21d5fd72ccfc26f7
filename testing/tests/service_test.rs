//! Behavior tests for the task engine over in-memory storage.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use chrono::Utc;
use questline_core::error::TaskError;
use questline_core::event::EventKind;
use questline_core::ids::{EventId, TaskId, UserId};
use questline_core::ports::{
    ClaimOutcome, ProgressRepository, TaskRepository, UnitOfWork, UnitOfWorkManager,
};
use questline_core::progress::TaskProgress;
use questline_core::service::TaskService;
use questline_testing::fixtures::{progress_event, sample_task, test_config};
use questline_testing::mocks::test_clock;
use questline_testing::store::InMemoryStore;
use std::sync::Arc;

async fn engine() -> (InMemoryStore, Arc<TaskService>) {
    let store = InMemoryStore::new();
    store.insert_task(sample_task("t-daily", 10)).await;
    store.insert_task(sample_task("t-social", 3)).await;
    let mut inactive = sample_task("t-old", 5);
    inactive.is_active = false;
    store.insert_task(inactive).await;

    let service = store.service(test_config(), Arc::new(test_clock()));
    (store, service)
}

#[tokio::test]
async fn events_accumulate_to_completion() {
    let (store, service) = engine().await;
    let user = UserId::new("u-1");
    let task = TaskId::new("t-daily");

    for (event_id, expected) in [("e-1", 4), ("e-2", 8), ("e-3", 10)] {
        service
            .process_event(progress_event(event_id, "u-1", "t-daily", 4))
            .await
            .expect("event should apply");
        let record = store.progress(&user, &task).await.expect("record exists");
        assert_eq!(record.progress, expected);
    }

    let record = store.progress(&user, &task).await.unwrap();
    assert!(record.completed);
    assert!(!record.claimed);
}

#[tokio::test]
async fn redelivery_is_a_reported_success_with_no_effect() {
    let (store, service) = engine().await;
    let user = UserId::new("u-1");
    let task = TaskId::new("t-daily");

    let event = progress_event("e-2", "u-1", "t-daily", 4);
    service.process_event(event.clone()).await.unwrap();
    let before = store.progress(&user, &task).await.unwrap();

    // Same event id again, even with a different amount.
    let mut resent = event;
    resent.payload.as_mut().unwrap().amount = 99;
    service.process_event(resent).await.expect("redelivery succeeds");

    let after = store.progress(&user, &task).await.unwrap();
    assert_eq!(after, before);
    assert!(store.event_recorded(&EventId::new("e-2")).await);
}

#[tokio::test]
async fn post_completion_events_mutate_nothing() {
    let (store, service) = engine().await;
    let user = UserId::new("u-1");
    let task = TaskId::new("t-social");

    service
        .process_event(progress_event("e-1", "u-1", "t-social", 3))
        .await
        .unwrap();
    let completed = store.progress(&user, &task).await.unwrap();
    assert!(completed.completed);

    service
        .process_event(progress_event("e-4", "u-1", "t-social", 5))
        .await
        .expect("post-completion event succeeds");
    assert_eq!(store.progress(&user, &task).await.unwrap(), completed);
    // The event is still recorded in the ledger.
    assert!(store.event_recorded(&EventId::new("e-4")).await);
}

#[tokio::test]
async fn invalid_events_never_reach_storage() {
    let (store, service) = engine().await;

    let mut event = progress_event("", "u-1", "t-daily", 4);
    let err = service.process_event(event.clone()).await.unwrap_err();
    assert!(matches!(err, TaskError::InvalidEvent(_)));

    event.event_id = EventId::new("e-1");
    event.payload.as_mut().unwrap().amount = 0;
    let err = service.process_event(event).await.unwrap_err();
    assert!(matches!(err, TaskError::InvalidEvent(_)));

    assert!(!store.event_recorded(&EventId::new("e-1")).await);
}

#[tokio::test]
async fn pipeline_rejections() {
    let (store, service) = engine().await;

    let err = service
        .process_event(progress_event("e-1", "u-1", "t-missing", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::TaskNotFound(_)));

    let err = service
        .process_event(progress_event("e-2", "u-1", "t-old", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::TaskInactive(_)));

    let mut claim = progress_event("e-3", "u-1", "t-daily", 1);
    claim.kind = EventKind::ClaimReward;
    claim.payload = None;
    let err = service.process_event(claim).await.unwrap_err();
    assert!(matches!(err, TaskError::UnsupportedKind(_)));

    // Rejected events leave no ledger entries behind.
    for id in ["e-1", "e-2", "e-3"] {
        assert!(!store.event_recorded(&EventId::new(id)).await);
    }
}

#[tokio::test]
async fn batch_counts_rejections_and_continues() {
    let (store, service) = engine().await;

    let batch = vec![
        progress_event("e-1", "u-1", "t-daily", 4),
        progress_event("e-2", "u-1", "t-daily", 4),
        progress_event("", "u-1", "t-daily", 4), // malformed: rejected up front
        progress_event("e-4", "u-1", "t-daily", 4),
        progress_event("e-5", "u-1", "t-old", 1), // inactive task: rejected
    ];

    let outcome = service.process_events(batch).await.expect("batch applies");
    assert_eq!(outcome.accepted, 3);
    assert_eq!(outcome.rejected, 2);

    // All three well-formed events landed: 4 + 4 + 4 clamped to 10.
    let record = store
        .progress(&UserId::new("u-1"), &TaskId::new("t-daily"))
        .await
        .unwrap();
    assert_eq!(record.progress, 10);
    assert!(record.completed);
}

#[tokio::test]
async fn batch_rejects_unsupported_and_unknown_task_events() {
    let (store, service) = engine().await;

    let mut unsupported = progress_event("e-2", "u-1", "t-daily", 1);
    unsupported.kind = EventKind::ClaimReward;
    unsupported.payload = None;

    let batch = vec![
        progress_event("e-1", "u-1", "t-daily", 4),
        unsupported,                                  // unsupported kind: rejected
        progress_event("e-3", "u-1", "t-missing", 1), // unknown task: rejected
    ];

    let outcome = service.process_events(batch).await.expect("batch applies");
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.rejected, 2);

    let record = store
        .progress(&UserId::new("u-1"), &TaskId::new("t-daily"))
        .await
        .unwrap();
    assert_eq!(record.progress, 4);
}

#[tokio::test]
async fn empty_batch_is_a_successful_no_op() {
    let (_store, service) = engine().await;
    let outcome = service.process_events(Vec::new()).await.unwrap();
    assert_eq!(outcome.accepted, 0);
    assert_eq!(outcome.rejected, 0);
}

#[tokio::test]
async fn infrastructure_failure_aborts_the_whole_batch() {
    let (store, service) = engine().await;

    // First event lands, then the ledger starts failing.
    service
        .process_event(progress_event("e-0", "u-1", "t-daily", 2))
        .await
        .unwrap();

    store.fail_event_ledger(true);
    let batch = vec![
        progress_event("e-1", "u-1", "t-daily", 4),
        progress_event("e-2", "u-1", "t-daily", 4),
    ];
    let err = service.process_events(batch).await.unwrap_err();
    assert!(matches!(err.source, TaskError::Storage(_)));
    assert_eq!(err.outcome.accepted, 0);
    store.fail_event_ledger(false);

    // Nothing from the aborted batch is visible; the earlier commit is.
    let record = store
        .progress(&UserId::new("u-1"), &TaskId::new("t-daily"))
        .await
        .unwrap();
    assert_eq!(record.progress, 2);
    assert!(!store.event_recorded(&EventId::new("e-1")).await);
    assert!(!store.event_recorded(&EventId::new("e-2")).await);
}

#[tokio::test]
async fn claim_flow() {
    let (store, service) = engine().await;
    let user = UserId::new("u-1");
    let task = TaskId::new("t-social");

    // Unknown task.
    let err = service
        .claim_reward(&user, &TaskId::new("t-missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::TaskNotFound(_)));

    // No progress record yet.
    let err = service.claim_reward(&user, &task).await.unwrap_err();
    assert!(matches!(err, TaskError::ProgressNotFound { .. }));

    // Not completed yet.
    service
        .process_event(progress_event("e-1", "u-1", "t-social", 1))
        .await
        .unwrap();
    let err = service.claim_reward(&user, &task).await.unwrap_err();
    assert!(matches!(err, TaskError::NotCompleted(_)));

    // Complete, then claim.
    service
        .process_event(progress_event("e-2", "u-1", "t-social", 2))
        .await
        .unwrap();
    service.claim_reward(&user, &task).await.expect("claim succeeds");
    assert!(store.progress(&user, &task).await.unwrap().claimed);

    // Retried claim is benign.
    service
        .claim_reward(&user, &task)
        .await
        .expect("retried claim succeeds");
}

#[tokio::test]
async fn concurrent_claims_commit_exactly_once() {
    let store = InMemoryStore::new();
    store.insert_task(sample_task("t-1", 1)).await;
    let user = UserId::new("u-1");
    let task = TaskId::new("t-1");

    let mut completed = TaskProgress::new(task.clone(), user.clone(), Utc::now());
    completed.add(1, 1, Utc::now());
    store.insert_progress(completed).await;

    let manager = store.manager();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let user = user.clone();
        let task = task.clone();
        handles.push(tokio::spawn(async move {
            let uow = manager.begin().await?;
            let outcome = uow.repositories().progress.claim(&user, &task, Utc::now()).await;
            match outcome {
                Ok(outcome) => {
                    uow.commit().await?;
                    Ok(outcome)
                }
                Err(err) => {
                    uow.rollback().await?;
                    Err(err)
                }
            }
        }));
    }

    let mut claimed = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.expect("task should not panic") {
            Ok(ClaimOutcome::Claimed) => claimed += 1,
            Ok(ClaimOutcome::AlreadyClaimed) => already += 1,
            Err(err) => panic!("unexpected claim error: {err}"),
        }
    }
    assert_eq!(claimed, 1);
    assert_eq!(already, 7);
}

#[tokio::test]
async fn closed_unit_of_work_rejects_further_use() {
    let store = InMemoryStore::new();
    store.insert_task(sample_task("t-1", 1)).await;
    let manager = store.manager();

    let uow = manager.begin().await.unwrap();
    uow.commit().await.unwrap();
    assert!(matches!(uow.commit().await, Err(TaskError::UnitOfWorkClosed)));
    assert!(matches!(uow.rollback().await, Err(TaskError::UnitOfWorkClosed)));

    // Repositories bound to a closed unit of work are unusable too.
    let repos = uow.repositories();
    assert!(matches!(
        repos.tasks.get_by_id(&TaskId::new("t-1")).await,
        Err(TaskError::UnitOfWorkClosed)
    ));

    // Same for a rolled-back unit of work.
    let uow = manager.begin().await.unwrap();
    uow.rollback().await.unwrap();
    assert!(matches!(uow.commit().await, Err(TaskError::UnitOfWorkClosed)));
}

#[tokio::test]
async fn query_synthesizes_zero_views() {
    let (_store, service) = engine().await;
    let user = UserId::new("u-nobody");

    let snapshot = service.get_tasks_with_progress(&user).await.unwrap();
    // Inactive tasks are excluded.
    assert_eq!(snapshot.tasks.len(), 2);
    assert_eq!(snapshot.progress.len(), 2);
    for (task, record) in snapshot.tasks.iter().zip(&snapshot.progress) {
        assert_eq!(record.task_id, task.id);
        assert_eq!(record.user_id, user);
        assert_eq!(record.progress, 0);
        assert!(!record.completed);
        assert!(!record.claimed);
    }
}

#[tokio::test]
async fn query_reflects_committed_progress() {
    let (_store, service) = engine().await;
    let user = UserId::new("u-1");

    service
        .process_event(progress_event("e-1", "u-1", "t-daily", 7))
        .await
        .unwrap();

    let snapshot = service.get_tasks_with_progress(&user).await.unwrap();
    let daily = snapshot
        .tasks
        .iter()
        .position(|task| task.id == TaskId::new("t-daily"))
        .unwrap();
    assert_eq!(snapshot.progress[daily].progress, 7);
}

#[tokio::test]
async fn get_task_surfaces_not_found() {
    let (_store, service) = engine().await;
    assert!(service.get_task(&TaskId::new("t-daily")).await.is_ok());
    assert!(matches!(
        service.get_task(&TaskId::new("t-missing")).await,
        Err(TaskError::TaskNotFound(_))
    ));
}
