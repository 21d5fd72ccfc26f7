//! Inbound task events.
//!
//! An event is an external signal that may advance progress. It is
//! constructed by the transport layer from wire input, validated before it
//! ever reaches the pipeline, and consumed exactly once logically (the
//! idempotency ledger tolerates any number of physical deliveries).

use crate::error::ValidationError;
use crate::ids::{EventId, RoomId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of an inbound event. Closed variant set: dispatch in the pipeline
/// is a `match` with an explicit default arm, never open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Direct progress increment.
    ProgressUpdate,
    /// User subscribed to a task; counts toward progress.
    TaskSubscribed,
    /// A step of a multi-step task was counted.
    TaskStepCounted,
    /// Reward claim request. Claims go through the dedicated claim flow;
    /// the event pipeline rejects this kind as unsupported.
    ClaimReward,
}

impl EventKind {
    /// Whether this kind belongs to the progress-update family and must
    /// carry a [`ProgressPayload`].
    #[must_use]
    pub const fn is_progress_update(self) -> bool {
        matches!(
            self,
            Self::ProgressUpdate | Self::TaskSubscribed | Self::TaskStepCounted
        )
    }

    /// Wire/database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProgressUpdate => "progress_update",
            Self::TaskSubscribed => "task_subscribed",
            Self::TaskStepCounted => "task_step_counted",
            Self::ClaimReward => "claim_reward",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress_update" => Ok(Self::ProgressUpdate),
            "task_subscribed" => Ok(Self::TaskSubscribed),
            "task_step_counted" => Ok(Self::TaskStepCounted),
            "claim_reward" => Ok(Self::ClaimReward),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// Progress payload attached to progress-update-family events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    /// Task whose progress is advanced.
    pub task_id: TaskId,
    /// Amount to add; strictly positive.
    pub amount: u32,
}

impl ProgressPayload {
    /// Structural validation: non-empty task reference, positive amount.
    ///
    /// # Errors
    ///
    /// [`ValidationError::MissingTaskId`] or [`ValidationError::InvalidAmount`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.task_id.is_empty() {
            return Err(ValidationError::MissingTaskId);
        }
        if self.amount == 0 {
            return Err(ValidationError::InvalidAmount);
        }
        Ok(())
    }
}

/// An external signal to apply to a user's task progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Globally unique event identifier; the ledger key.
    pub event_id: EventId,
    /// User the event belongs to.
    pub user_id: UserId,
    /// Originating room/session, when known.
    pub room_id: Option<RoomId>,
    /// Event kind.
    pub kind: EventKind,
    /// Required for progress-update-family kinds.
    pub payload: Option<ProgressPayload>,
    /// When the originator produced the event.
    pub created_at: DateTime<Utc>,
    /// Set by the engine when the event is applied, never by the caller.
    pub processed_at: Option<DateTime<Utc>>,
}

impl TaskEvent {
    /// Structural validation, run before the event reaches the pipeline.
    ///
    /// # Errors
    ///
    /// A [`ValidationError`] naming the first missing/invalid field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.is_empty() {
            return Err(ValidationError::MissingEventId);
        }
        if self.user_id.is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        if self.kind.is_progress_update() {
            let payload = self.payload.as_ref().ok_or(ValidationError::MissingPayload)?;
            payload.validate()?;
        }
        Ok(())
    }
}
