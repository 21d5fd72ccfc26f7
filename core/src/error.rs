//! Error taxonomy for the task engine.
//!
//! Failures fall into five classes with different propagation policies:
//!
//! - **validation** — malformed event; rejected before touching storage
//! - **not-found** — task/progress absent; surfaced distinctly so callers
//!   can tell empty state from failure
//! - **precondition** — business-rule rejections (inactive task, not
//!   completed, already claimed); never retried
//! - **unsupported** — unknown event kind; permanent rejection
//! - **infrastructure** — storage/transaction faults; abort the enclosing
//!   unit of work
//!
//! [`TaskError::is_rejection`] marks the classes that are non-fatal during
//! batch application: they reject the individual event and the batch
//! continues within the same transaction.

use crate::ids::{TaskId, UserId};
use thiserror::Error;

/// Structural validation failures for inbound events.
///
/// These are detected before an event ever reaches the pipeline and are
/// never retried by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Event identifier is missing or empty.
    #[error("event_id is required")]
    MissingEventId,

    /// User reference is missing or empty.
    #[error("user_id is required")]
    MissingUserId,

    /// Progress-update-family event without an attached payload.
    #[error("event payload is required for progress updates")]
    MissingPayload,

    /// Payload task reference is missing or empty.
    #[error("event task_id is required")]
    MissingTaskId,

    /// Payload amount must be strictly positive.
    #[error("event amount must be positive")]
    InvalidAmount,

    /// Event kind string did not match the closed variant set.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
}

/// Errors surfaced by the task engine.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Malformed event, rejected before reaching storage.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] ValidationError),

    /// No catalog task with the given identifier.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// No progress record for the given (user, task) pair.
    #[error("progress not found for user {user} and task {task}")]
    ProgressNotFound {
        /// User whose progress was requested.
        user: UserId,
        /// Task the progress belongs to.
        task: TaskId,
    },

    /// The task exists but is not active; progress events are rejected.
    #[error("task {0} is inactive")]
    TaskInactive(TaskId),

    /// Claim attempted before the task was completed.
    #[error("task {0} is not completed yet")]
    NotCompleted(TaskId),

    /// Claim attempted on an already-claimed reward.
    #[error("reward for task {0} already claimed")]
    AlreadyClaimed(TaskId),

    /// Event kind is outside the set the pipeline can apply.
    #[error("unsupported event kind: {0}")]
    UnsupportedKind(String),

    /// Commit or rollback called on an already-closed unit of work.
    /// Programmer defect, not a business error.
    #[error("unit of work already closed")]
    UnitOfWorkClosed,

    /// Storage or transaction failure; the enclosing unit of work is
    /// aborted.
    #[error("storage error: {0}")]
    Storage(String),
}

impl TaskError {
    /// Whether this failure is non-fatal for batch processing.
    ///
    /// Rejections count the individual event as rejected and let the batch
    /// continue inside the same transaction; every other error aborts the
    /// whole batch.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedKind(_)
                | Self::TaskNotFound(_)
                | Self::TaskInactive(_)
                | Self::ProgressNotFound { .. }
        )
    }

    /// Shorthand for an infrastructure failure from a storage adapter.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_classification() {
        assert!(TaskError::UnsupportedKind("claim_reward".into()).is_rejection());
        assert!(TaskError::TaskNotFound(TaskId::new("t")).is_rejection());
        assert!(TaskError::TaskInactive(TaskId::new("t")).is_rejection());
        assert!(
            TaskError::ProgressNotFound {
                user: UserId::new("u"),
                task: TaskId::new("t"),
            }
            .is_rejection()
        );
    }

    #[test]
    fn fatal_classification() {
        assert!(!TaskError::Storage("connection reset".into()).is_rejection());
        assert!(!TaskError::UnitOfWorkClosed.is_rejection());
        assert!(!TaskError::InvalidEvent(ValidationError::MissingEventId).is_rejection());
        assert!(!TaskError::AlreadyClaimed(TaskId::new("t")).is_rejection());
        assert!(!TaskError::NotCompleted(TaskId::new("t")).is_rejection());
    }

    #[test]
    fn display_includes_identifiers() {
        let err = TaskError::ProgressNotFound {
            user: UserId::new("u-1"),
            task: TaskId::new("t-9"),
        };
        let text = format!("{err}");
        assert!(text.contains("u-1"));
        assert!(text.contains("t-9"));
    }
}
