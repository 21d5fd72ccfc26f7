//! Tests for streaming ingestion and progress subscriptions.
//!
//! All timer-driven behavior runs under paused virtual time
//! (`start_paused`), so idle windows and session deadlines elapse
//! instantly and deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use futures::{StreamExt, pin_mut, stream};
use questline_core::ids::{TaskId, UserId};
use questline_core::ingest::{
    EventBatch, EventStreamProcessor, ReceiveError, StreamError, StreamTally,
};
use questline_core::ports::{AtomicSequence, UnitOfWorkManager};
use questline_core::service::TaskService;
use questline_testing::fixtures::{progress_event, sample_task, test_config};
use questline_testing::mocks::test_clock;
use questline_testing::store::InMemoryStore;
use std::sync::Arc;
use tokio::sync::watch;

async fn engine() -> (InMemoryStore, Arc<TaskService>) {
    let store = InMemoryStore::new();
    store.insert_task(sample_task("t-daily", 10)).await;
    let service = store.service(test_config(), Arc::new(test_clock()));
    (store, service)
}

fn processor(service: Arc<TaskService>) -> EventStreamProcessor {
    EventStreamProcessor::new(service, Arc::new(AtomicSequence::new()))
}

#[tokio::test(start_paused = true)]
async fn clean_close_yields_running_tallies_then_summary() {
    let (_store, service) = engine().await;
    let processor = processor(service);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let batches = vec![
        Ok(EventBatch::new(vec![
            progress_event("e-1", "u-1", "t-daily", 4),
            progress_event("e-2", "u-1", "t-daily", 4),
        ])),
        // One frame discarded by the transport, one event for an unknown
        // task: both count as rejected.
        Ok(EventBatch {
            events: vec![progress_event("e-3", "u-1", "t-missing", 1)],
            rejected_on_arrival: 1,
        }),
    ];
    let out = processor.run(stream::iter(batches), cancel_rx);
    pin_mut!(out);

    let first = out.next().await.unwrap().unwrap();
    assert_eq!(
        first,
        StreamTally {
            accepted: 2,
            rejected: 0,
            batches: 1,
            events: 2,
        }
    );

    let second = out.next().await.unwrap().unwrap();
    assert_eq!(
        second,
        StreamTally {
            accepted: 2,
            rejected: 2,
            batches: 2,
            events: 4,
        }
    );

    // The inbound stream ended: the summary repeats the totals, then the
    // session stream finishes.
    let summary = out.next().await.unwrap().unwrap();
    assert_eq!(summary, second);
    assert!(out.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn idle_session_emits_summary_then_times_out() {
    let (_store, service) = engine().await;
    let processor = processor(service);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let inbound = stream::iter(vec![Ok(EventBatch::new(vec![progress_event(
        "e-1", "u-1", "t-daily", 4,
    )]))])
    .chain(stream::pending());
    let out = processor.run(inbound, cancel_rx);
    pin_mut!(out);

    let tally = out.next().await.unwrap().unwrap();
    assert_eq!(tally.accepted, 1);

    // No further batches: virtual time jumps to the idle deadline.
    let summary = out.next().await.unwrap().unwrap();
    assert_eq!(summary, tally);
    let err = out.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::IdleTimeout));
    assert!(out.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_the_session_without_a_summary() {
    let (_store, service) = engine().await;
    let processor = processor(service);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let out = processor.run(
        stream::pending::<Result<EventBatch, ReceiveError>>(),
        cancel_rx,
    );
    pin_mut!(out);

    cancel_tx.send(true).unwrap();
    let err = out.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::Cancelled));
    assert!(out.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_cancel_sender_does_not_cancel() {
    let (_store, service) = engine().await;
    let processor = processor(service);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    drop(cancel_tx);

    let out = processor.run(
        stream::pending::<Result<EventBatch, ReceiveError>>(),
        cancel_rx,
    );
    pin_mut!(out);

    // The session idles out instead of reporting a cancellation.
    let summary = out.next().await.unwrap().unwrap();
    assert_eq!(summary, StreamTally::default());
    let err = out.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::IdleTimeout));
}

#[tokio::test(start_paused = true)]
async fn receive_failure_ends_the_session() {
    let (_store, service) = engine().await;
    let processor = processor(service);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let inbound = stream::iter(vec![
        Ok(EventBatch::new(vec![progress_event("e-1", "u-1", "t-daily", 4)])),
        Err(ReceiveError("connection reset".to_string())),
    ]);
    let out = processor.run(inbound, cancel_rx);
    pin_mut!(out);

    let tally = out.next().await.unwrap().unwrap();
    assert_eq!(tally.accepted, 1);
    let err = out.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::Receive(_)));
    assert!(out.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn aborted_batch_ends_the_session() {
    let (store, service) = engine().await;
    let processor = processor(service);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    store.fail_event_ledger(true);
    let inbound = stream::iter(vec![Ok(EventBatch::new(vec![progress_event(
        "e-1", "u-1", "t-daily", 4,
    )]))]);
    let out = processor.run(inbound, cancel_rx);
    pin_mut!(out);

    let err = out.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::Batch(_)));
    assert!(out.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn slow_batch_hits_the_application_deadline() {
    let (store, service) = engine().await;
    let processor = processor(service);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    // Hold an open unit of work so batch application blocks on the store.
    let blocker = store.manager().begin().await.unwrap();

    let inbound = stream::iter(vec![Ok(EventBatch::new(vec![progress_event(
        "e-1", "u-1", "t-daily", 4,
    )]))])
    .chain(stream::pending());
    let out = processor.run(inbound, cancel_rx);
    pin_mut!(out);

    let err = out.next().await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::BatchDeadline));
    assert!(out.next().await.is_none());
    drop(blocker);
}

#[tokio::test(start_paused = true)]
async fn empty_batches_tick_the_tally_without_touching_storage() {
    let (_store, service) = engine().await;
    let processor = processor(service);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let inbound = stream::iter(vec![Ok(EventBatch::new(Vec::new()))]);
    let out = processor.run(inbound, cancel_rx);
    pin_mut!(out);

    let tally = out.next().await.unwrap().unwrap();
    assert_eq!(
        tally,
        StreamTally {
            accepted: 0,
            rejected: 0,
            batches: 1,
            events: 0,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn tally_counters_saturate_instead_of_overflowing() {
    let (_store, service) = engine().await;
    let processor = processor(service);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    // A long-lived session can accumulate arbitrary rejection counts; the
    // tally pins at the maximum rather than wrapping.
    let inbound = stream::iter(vec![
        Ok(EventBatch {
            events: Vec::new(),
            rejected_on_arrival: u32::MAX,
        }),
        Ok(EventBatch {
            events: Vec::new(),
            rejected_on_arrival: 1,
        }),
    ]);
    let out = processor.run(inbound, cancel_rx);
    pin_mut!(out);

    let first = out.next().await.unwrap().unwrap();
    assert_eq!(first.rejected, u32::MAX);
    assert_eq!(first.events, u32::MAX);

    let second = out.next().await.unwrap().unwrap();
    assert_eq!(second.rejected, u32::MAX);
    assert_eq!(second.events, u32::MAX);
    assert_eq!(second.batches, 2);
}

#[tokio::test(start_paused = true)]
async fn subscription_reflects_new_progress() {
    let (_store, service) = engine().await;
    let user = UserId::new("u-1");

    let sub = service.subscribe(user.clone());
    pin_mut!(sub);

    // Initial snapshot arrives immediately and shows zero progress.
    let first = sub.next().await.unwrap().unwrap();
    assert!(first.progress.iter().all(|record| record.progress == 0));

    service
        .process_event(progress_event("e-1", "u-1", "t-daily", 4))
        .await
        .unwrap();

    // The next refresh is a full recomputation.
    let next = sub.next().await.unwrap().unwrap();
    let daily = next
        .tasks
        .iter()
        .position(|task| task.id == TaskId::new("t-daily"))
        .unwrap();
    assert_eq!(next.progress[daily].progress, 4);
}

#[tokio::test(start_paused = true)]
async fn subscription_ends_cleanly_at_max_duration() {
    let (_store, service) = engine().await;
    let sub = service.subscribe(UserId::new("u-1"));
    pin_mut!(sub);

    let mut snapshots = 0usize;
    while let Some(item) = sub.next().await {
        item.unwrap();
        snapshots += 1;
        assert!(snapshots < 200, "subscription should end at max duration");
    }

    // Initial snapshot plus one per interval until the deadline; the final
    // tick races the deadline, so allow one either way.
    assert!((150..=151).contains(&snapshots), "got {snapshots}");
}
