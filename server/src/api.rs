//! HTTP and streaming endpoints.
//!
//! - `GET  /health` — liveness
//! - `GET  /api/users/:user/tasks` — active tasks with the user's progress
//! - `GET  /api/tasks/:id` — one catalog task
//! - `POST /api/events` — apply a single event
//! - `POST /api/events/batch` — apply an ordered batch atomically
//! - `POST /api/users/:user/tasks/:task/claim` — claim a reward
//! - `GET  /api/events/stream` — WebSocket duplex batch ingestion
//! - `GET  /api/users/:user/progress/stream` — SSE progress subscription

use crate::state::AppState;
use crate::wire::{ApiError, EventRequest, SnapshotResponse, TaskView, decode_batch};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt, future, pin_mut};
use questline_core::ids::{TaskId, UserId};
use questline_core::ingest::{EventBatch, ReceiveError, StreamError};
use questline_core::service::{BatchError, BatchOutcome};
use serde::Serialize;
use std::convert::Infallible;
use tracing::{debug, info, warn};

/// Build the complete router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/users/:user/tasks", get(get_tasks_with_progress))
        .route("/users/:user/tasks/:task/claim", post(claim_reward))
        .route("/users/:user/progress/stream", get(subscribe_progress))
        .route("/tasks/:id", get(get_task))
        .route("/events", post(process_event))
        .route("/events/batch", post(process_events))
        .route("/events/stream", get(stream_events));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .with_state(state)
}

/// Liveness probe.
async fn health_check() -> &'static str {
    "OK"
}

/// Acknowledgement for a single applied event.
#[derive(Debug, Serialize)]
struct EventAccepted {
    accepted: bool,
}

/// Counters for an applied batch.
#[derive(Debug, Serialize)]
struct BatchResponse {
    accepted: u32,
    rejected: u32,
}

impl From<BatchOutcome> for BatchResponse {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            accepted: outcome.accepted,
            rejected: outcome.rejected,
        }
    }
}

async fn get_tasks_with_progress(
    Path(user): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let snapshot = state
        .service
        .get_tasks_with_progress(&UserId::new(user))
        .await?;
    Ok(Json(snapshot.into()))
}

async fn get_task(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TaskView>, ApiError> {
    let task = state.service.get_task(&TaskId::new(id)).await?;
    Ok(Json(task.into()))
}

async fn process_event(
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> Result<Json<EventAccepted>, ApiError> {
    let event = request
        .into_event()
        .map_err(questline_core::error::TaskError::from)?;
    state.service.process_event(event).await?;
    Ok(Json(EventAccepted { accepted: true }))
}

async fn process_events(
    State(state): State<AppState>,
    Json(requests): Json<Vec<EventRequest>>,
) -> Result<Json<BatchResponse>, ApiError> {
    // Kind strings outside the variant set never reach the engine; they
    // count as rejected alongside the engine's own rejections.
    let mut rejected_on_wire: u32 = 0;
    let mut events = Vec::with_capacity(requests.len());
    for request in requests {
        match request.into_event() {
            Ok(event) => events.push(event),
            Err(err) => {
                warn!(error = %err, "batch event dropped at the boundary");
                rejected_on_wire += 1;
            }
        }
    }

    let outcome = state
        .service
        .process_events(events)
        .await
        .map_err(|BatchError { source, .. }| ApiError(source))?;
    Ok(Json(BatchResponse {
        accepted: outcome.accepted,
        rejected: outcome.rejected + rejected_on_wire,
    }))
}

async fn claim_reward(
    Path((user, task)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<EventAccepted>, ApiError> {
    state
        .service
        .claim_reward(&UserId::new(user), &TaskId::new(task))
        .await?;
    Ok(Json(EventAccepted { accepted: true }))
}

/// WebSocket endpoint for duplex batch ingestion.
///
/// Each inbound text frame is a JSON array of events forming one batch;
/// after every batch the running tally is sent back. The session follows
/// the engine's termination policy: clean close and idle timeout deliver a
/// final summary, cancellation (server shutdown) does not.
#[allow(clippy::unused_async)] // Axum handler signature requires async
async fn stream_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    info!("event stream connection requested");
    ws.on_upgrade(move |socket| handle_event_socket(socket, state))
}

fn inbound_batches(
    receiver: SplitStream<WebSocket>,
) -> impl Stream<Item = Result<EventBatch, ReceiveError>> + Send + 'static {
    receiver
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(decode_batch(&text))),
                // Control frames carry no batches.
                Ok(_) => None,
                Err(err) => Some(Err(ReceiveError(err.to_string()))),
            })
        })
}

async fn handle_event_socket(socket: WebSocket, state: AppState) {
    let (mut sink, receiver) = socket.split();
    let session = state
        .processor
        .run(inbound_batches(receiver), state.shutdown.clone());
    pin_mut!(session);

    while let Some(item) = session.next().await {
        match item {
            Ok(tally) => {
                if send_json(&mut sink, &tally).await.is_err() {
                    debug!("event stream client went away");
                    break;
                }
            }
            // Cancellation terminates silently; everything else is reported
            // before closing.
            Err(StreamError::Cancelled) => break,
            Err(err) => {
                let report = serde_json::json!({ "error": err.to_string() });
                let _ = send_json(&mut sink, &report).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn send_json<T: Serialize>(
    sink: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).map_err(axum::Error::new)?;
    sink.send(Message::Text(text)).await
}

/// SSE endpoint streaming periodic progress snapshots.
///
/// Emits an immediate snapshot, then one per refresh interval; the stream
/// ends cleanly when the maximum session duration elapses. A storage
/// failure is reported as a terminal `error` event.
#[allow(clippy::unused_async)] // Axum handler signature requires async
async fn subscribe_progress(
    Path(user): Path<String>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let snapshots = state.service.subscribe(UserId::new(user));
    let events = snapshots.map(|item| {
        let event = match item {
            Ok(snapshot) => SseEvent::default()
                .event("progress")
                .json_data(SnapshotResponse::from(snapshot)),
            Err(err) => Ok(SseEvent::default()
                .event("error")
                .data(err.to_string())),
        };
        Ok(event.unwrap_or_else(|_| SseEvent::default().event("error").data("serialization failed")))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
