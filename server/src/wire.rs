//! Wire types and error mapping for the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use questline_core::error::{TaskError, ValidationError};
use questline_core::event::{EventKind, ProgressPayload, TaskEvent};
use questline_core::ids::{EventId, RoomId, TaskId, UserId};
use questline_core::ingest::EventBatch;
use questline_core::progress::TaskProgress;
use questline_core::service::ProgressSnapshot;
use questline_core::task::Task;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// An inbound event as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    /// Globally unique event identifier.
    pub event_id: String,
    /// Owning user.
    pub user_id: String,
    /// Originating room/session, when known.
    #[serde(default)]
    pub room_id: Option<String>,
    /// Event kind string.
    pub kind: String,
    /// Progress payload for progress-update-family kinds.
    #[serde(default)]
    pub payload: Option<PayloadRequest>,
    /// When the originator produced the event; defaults to receipt time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Progress payload on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadRequest {
    /// Task whose progress is advanced.
    pub task_id: String,
    /// Amount to add.
    pub amount: u32,
}

impl EventRequest {
    /// Map to the domain event. The kind string is resolved against the
    /// closed variant set here; everything else is validated by the engine.
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownKind`] for a kind outside the variant set.
    pub fn into_event(self) -> Result<TaskEvent, ValidationError> {
        let kind: EventKind = self.kind.parse()?;
        Ok(TaskEvent {
            event_id: EventId::new(self.event_id),
            user_id: UserId::new(self.user_id),
            room_id: self.room_id.map(RoomId::new),
            kind,
            payload: self.payload.map(|payload| ProgressPayload {
                task_id: TaskId::new(payload.task_id),
                amount: payload.amount,
            }),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            processed_at: None,
        })
    }
}

/// Decode one WebSocket text frame into a batch.
///
/// The frame is a JSON array of events. Entries that fail to decode or
/// carry an unknown kind are counted as rejected on arrival rather than
/// failing the whole frame; a frame that is not an array counts as one
/// rejected frame.
#[must_use]
pub fn decode_batch(text: &str) -> EventBatch {
    let Ok(raw) = serde_json::from_str::<Vec<serde_json::Value>>(text) else {
        warn!("undecodable stream frame");
        return EventBatch {
            events: Vec::new(),
            rejected_on_arrival: 1,
        };
    };

    let mut batch = EventBatch::default();
    for value in raw {
        let event = serde_json::from_value::<EventRequest>(value)
            .ok()
            .and_then(|request| request.into_event().ok());
        match event {
            Some(event) => batch.events.push(event),
            None => batch.rejected_on_arrival += 1,
        }
    }
    batch
}

/// Catalog task as returned to clients.
#[derive(Debug, Serialize)]
pub struct TaskView {
    /// Catalog identifier.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Task kind string.
    pub kind: String,
    /// Completion target.
    pub target: u32,
    /// Opaque reward descriptor.
    pub reward: serde_json::Value,
    /// Whether the task accepts progress events.
    pub is_active: bool,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.into_inner(),
            title: task.title,
            description: task.description,
            kind: task.kind.as_str().to_string(),
            target: task.target,
            reward: task.reward,
            is_active: task.is_active,
        }
    }
}

/// A user's progress toward one task as returned to clients.
#[derive(Debug, Serialize)]
pub struct ProgressView {
    /// Task this progress belongs to.
    pub task_id: String,
    /// Accumulated count.
    pub progress: u32,
    /// Whether the target was reached.
    pub completed: bool,
    /// Whether the reward was collected.
    pub claimed: bool,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl From<TaskProgress> for ProgressView {
    fn from(progress: TaskProgress) -> Self {
        Self {
            task_id: progress.task_id.into_inner(),
            progress: progress.progress,
            completed: progress.completed,
            claimed: progress.claimed,
            updated_at: progress.updated_at,
        }
    }
}

/// Tasks paired with progress, as returned by the query and subscription
/// endpoints.
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    /// Active tasks with the caller's progress.
    pub tasks: Vec<TaskWithProgress>,
}

/// One task joined with the caller's progress view.
#[derive(Debug, Serialize)]
pub struct TaskWithProgress {
    /// The catalog task.
    #[serde(flatten)]
    pub task: TaskView,
    /// The caller's progress, zero-valued when no record exists.
    pub progress: ProgressView,
}

impl From<ProgressSnapshot> for SnapshotResponse {
    fn from(snapshot: ProgressSnapshot) -> Self {
        let tasks = snapshot
            .tasks
            .into_iter()
            .zip(snapshot.progress)
            .map(|(task, progress)| TaskWithProgress {
                task: task.into(),
                progress: progress.into(),
            })
            .collect();
        Self { tasks }
    }
}

/// Engine error with its HTTP mapping.
#[derive(Debug)]
pub struct ApiError(pub TaskError);

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TaskError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            TaskError::TaskNotFound(_) | TaskError::ProgressNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            TaskError::TaskInactive(_)
            | TaskError::NotCompleted(_)
            | TaskError::AlreadyClaimed(_) => StatusCode::CONFLICT,
            TaskError::UnsupportedKind(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TaskError::UnitOfWorkClosed | TaskError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %self.0, "internal error");
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
