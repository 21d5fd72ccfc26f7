//! Streaming batch ingestion.
//!
//! [`EventStreamProcessor`] drives one duplex ingestion session: batches
//! arrive from a transport stream, each is applied through
//! [`TaskService::process_events`] under a per-batch deadline, and a running
//! tally is emitted after every batch. Three things end a session:
//!
//! - clean close of the inbound stream: the final tally is the last item
//! - idleness past the configured window: final tally, then
//!   [`StreamError::IdleTimeout`]
//! - cancellation: [`StreamError::Cancelled`], nothing else
//!
//! Receiving runs in its own task feeding a single-slot channel, so the
//! select loop can watch idleness and cancellation while a receive is in
//! flight. The slot never buffers more than one batch; application
//! backpressures the transport.

use crate::event::TaskEvent;
use crate::ports::StreamSequence;
use crate::service::{BatchError, TaskService};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// One transport-delimited group of events, plus the count of frames the
/// transport already discarded while decoding it.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    /// Decoded events to apply.
    pub events: Vec<TaskEvent>,
    /// Frames rejected before decoding produced an event.
    pub rejected_on_arrival: u32,
}

impl EventBatch {
    /// A batch of cleanly decoded events.
    #[must_use]
    pub fn new(events: Vec<TaskEvent>) -> Self {
        Self {
            events,
            rejected_on_arrival: 0,
        }
    }
}

/// Transport-level failure while receiving from the inbound stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("receive failed: {0}")]
pub struct ReceiveError(pub String);

/// Running totals for one ingestion session. Emitted after every batch and
/// once more as the stream summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTally {
    /// Events committed across all batches so far.
    pub accepted: u32,
    /// Events rejected across all batches so far.
    pub rejected: u32,
    /// Batches received.
    pub batches: u32,
    /// Events received, accepted or not.
    pub events: u32,
}

/// Terminal failure of an ingestion session.
#[derive(Debug, Error)]
pub enum StreamError {
    /// No batch arrived within the idle window.
    #[error("stream idle timeout")]
    IdleTimeout,
    /// The session was cancelled from outside.
    #[error("stream cancelled")]
    Cancelled,
    /// A single batch exceeded its application deadline.
    #[error("batch deadline exceeded")]
    BatchDeadline,
    /// The transport failed mid-stream.
    #[error("receive failed: {0}")]
    Receive(String),
    /// A batch aborted with a non-rejection failure.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Aborts the receive task if the session stream is dropped mid-flight.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Resolves only when cancellation is actually signalled. A dropped sender
/// means no one can cancel any more, not that the session should end.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Driver for duplex event-stream sessions.
pub struct EventStreamProcessor {
    service: Arc<TaskService>,
    sequence: Arc<dyn StreamSequence>,
}

impl EventStreamProcessor {
    /// New processor over the engine and a session-id sequence.
    pub fn new(service: Arc<TaskService>, sequence: Arc<dyn StreamSequence>) -> Self {
        Self { service, sequence }
    }

    /// Run one ingestion session over `inbound`, yielding a running
    /// [`StreamTally`] per batch. See the module docs for the three
    /// termination policies.
    pub fn run<S>(
        &self,
        inbound: S,
        cancel: watch::Receiver<bool>,
    ) -> impl Stream<Item = Result<StreamTally, StreamError>> + Send + 'static
    where
        S: Stream<Item = Result<EventBatch, ReceiveError>> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let stream_id = self.sequence.next_id();

        async_stream::stream! {
            let started = Instant::now();
            let idle_timeout = service.config().idle_timeout;
            let batch_timeout = service.config().batch_timeout;
            info!(stream_id, "event stream started");

            // Single-slot handoff: the receive task parks here until the
            // previous batch has been applied.
            let (slot_tx, mut slot_rx) = mpsc::channel::<Result<EventBatch, ReceiveError>>(1);
            let _recv_guard = AbortOnDrop(tokio::spawn(async move {
                futures::pin_mut!(inbound);
                while let Some(item) = inbound.next().await {
                    let fatal = item.is_err();
                    if slot_tx.send(item).await.is_err() || fatal {
                        return;
                    }
                }
            }));

            let cancel_signal = cancelled(cancel);
            tokio::pin!(cancel_signal);

            let mut tally = StreamTally::default();
            loop {
                // A fresh sleep per iteration: the idle window restarts on
                // every received batch.
                let idle = tokio::time::sleep(idle_timeout);
                tokio::pin!(idle);

                tokio::select! {
                    () = &mut cancel_signal => {
                        info!(stream_id, "event stream cancelled");
                        yield Err(StreamError::Cancelled);
                        return;
                    }
                    () = &mut idle => {
                        warn!(
                            stream_id,
                            accepted = tally.accepted,
                            rejected = tally.rejected,
                            "event stream idle timeout"
                        );
                        yield Ok(tally);
                        yield Err(StreamError::IdleTimeout);
                        return;
                    }
                    received = slot_rx.recv() => match received {
                        None => {
                            info!(
                                stream_id,
                                accepted = tally.accepted,
                                rejected = tally.rejected,
                                batches = tally.batches,
                                elapsed = ?started.elapsed(),
                                "event stream done"
                            );
                            yield Ok(tally);
                            return;
                        }
                        Some(Err(err)) => {
                            error!(stream_id, error = %err, "event stream receive failed");
                            yield Err(StreamError::Receive(err.0));
                            return;
                        }
                        Some(Ok(batch)) => {
                            let received_events =
                                u32::try_from(batch.events.len()).unwrap_or(u32::MAX);
                            tally.batches = tally.batches.saturating_add(1);
                            tally.events = tally
                                .events
                                .saturating_add(received_events)
                                .saturating_add(batch.rejected_on_arrival);
                            tally.rejected =
                                tally.rejected.saturating_add(batch.rejected_on_arrival);

                            if !batch.events.is_empty() {
                                debug!(stream_id, events = received_events, "applying batch");
                                let applied = tokio::time::timeout(
                                    batch_timeout,
                                    service.process_events(batch.events),
                                )
                                .await;
                                let outcome = match applied {
                                    Ok(Ok(outcome)) => outcome,
                                    Ok(Err(batch_err)) => {
                                        warn!(stream_id, error = %batch_err, "batch aborted");
                                        yield Err(StreamError::Batch(batch_err));
                                        return;
                                    }
                                    Err(_elapsed) => {
                                        warn!(stream_id, "batch deadline exceeded");
                                        yield Err(StreamError::BatchDeadline);
                                        return;
                                    }
                                };
                                tally.accepted = tally.accepted.saturating_add(outcome.accepted);
                                tally.rejected = tally.rejected.saturating_add(outcome.rejected);
                            }
                            yield Ok(tally);
                        }
                    }
                }
            }
        }
    }
}
