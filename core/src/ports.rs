//! Storage collaborator boundary.
//!
//! The engine talks to storage exclusively through these traits. A
//! [`UnitOfWorkManager`] opens atomic transactions; the [`Repositories`]
//! bundle obtained from a [`UnitOfWork`] is bound to that transaction, so
//! everything performed through one bundle commits or rolls back as a unit.
//!
//! Implementations:
//!
//! - `questline-postgres`: production, one `sqlx` transaction per unit of work
//! - `questline-testing`: in-memory, whole-store lock per unit of work
//!
//! # Dyn Compatibility
//!
//! All traits are `async_trait` objects so the service can hold
//! `Arc<dyn ...>` and tests can swap implementations freely.

use crate::error::TaskError;
use crate::event::TaskEvent;
use crate::ids::{EventId, TaskId, UserId};
use crate::progress::TaskProgress;
use crate::task::Task;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read access to the task catalog.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Load one task.
    ///
    /// # Errors
    ///
    /// [`TaskError::TaskNotFound`] when no such task exists;
    /// [`TaskError::Storage`] on infrastructure failure.
    async fn get_by_id(&self, id: &TaskId) -> Result<Task, TaskError>;

    /// All currently active tasks.
    ///
    /// # Errors
    ///
    /// [`TaskError::Storage`] on infrastructure failure.
    async fn list_active(&self) -> Result<Vec<Task>, TaskError>;
}

/// Result of the conditional claim transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This call committed the `claimed = true` transition.
    Claimed,
    /// The record was already claimed; benign under retried requests.
    AlreadyClaimed,
}

/// Persistence for progress records.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Load the progress record for a (user, task) pair.
    ///
    /// Absence is a valid state (`Ok(None)`), not an error: a record only
    /// exists after the first applied progress event.
    ///
    /// # Errors
    ///
    /// [`TaskError::Storage`] on infrastructure failure.
    async fn get(&self, user: &UserId, task: &TaskId)
    -> Result<Option<TaskProgress>, TaskError>;

    /// Insert a fresh record; returns it with the storage-assigned id.
    ///
    /// # Errors
    ///
    /// [`TaskError::Storage`] on infrastructure failure, including the
    /// unique (user, task) constraint.
    async fn create(&self, progress: &TaskProgress) -> Result<TaskProgress, TaskError>;

    /// Update an existing record in place.
    ///
    /// # Errors
    ///
    /// [`TaskError::ProgressNotFound`] when no row matches;
    /// [`TaskError::Storage`] on infrastructure failure.
    async fn update(&self, progress: &TaskProgress) -> Result<(), TaskError>;

    /// Atomically transition `completed = true, claimed = false` to
    /// `claimed = true` — one conditional update, never read-then-write, so
    /// concurrent claimers cannot both observe `claimed = false`.
    ///
    /// # Errors
    ///
    /// [`TaskError::ProgressNotFound`] when the record is absent,
    /// [`TaskError::NotCompleted`] when the task is not completed,
    /// [`TaskError::Storage`] on infrastructure failure. An already-claimed
    /// record is reported as [`ClaimOutcome::AlreadyClaimed`], not an error.
    async fn claim(
        &self,
        user: &UserId,
        task: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, TaskError>;
}

/// The idempotency ledger: which event identifiers already took effect.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Whether the event identifier is already recorded.
    ///
    /// # Errors
    ///
    /// [`TaskError::Storage`] on infrastructure failure.
    async fn is_processed(&self, id: &EventId) -> Result<bool, TaskError>;

    /// Record the event as processed. Called after [`Self::is_processed`]
    /// reported false within the same unit of work.
    ///
    /// # Errors
    ///
    /// [`TaskError::Storage`] on infrastructure failure, or when a
    /// concurrent delivery recorded the identifier first; the enclosing
    /// unit of work aborts, so only one delivery's effects commit.
    async fn mark_processed(&self, event: &TaskEvent) -> Result<(), TaskError>;
}

/// The bundle of repositories bound to one transaction context.
#[derive(Clone)]
pub struct Repositories {
    /// Task catalog access.
    pub tasks: Arc<dyn TaskRepository>,
    /// Progress records.
    pub progress: Arc<dyn ProgressRepository>,
    /// Idempotency ledger.
    pub events: Arc<dyn EventRepository>,
}

/// One open atomic transaction.
///
/// Nothing performed through the bundle is visible to other units of work
/// until `commit` succeeds. Dropping an unfinished unit of work must roll
/// the transaction back — implementations lean on RAII, never on call-site
/// cleanup — so no exit path (error, early return, panic, cancellation)
/// can leave a transaction open.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Repositories bound to this transaction.
    fn repositories(&self) -> Repositories;

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// [`TaskError::UnitOfWorkClosed`] on double close;
    /// [`TaskError::Storage`] on commit failure.
    async fn commit(&self) -> Result<(), TaskError>;

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// [`TaskError::UnitOfWorkClosed`] on double close;
    /// [`TaskError::Storage`] on rollback failure.
    async fn rollback(&self) -> Result<(), TaskError>;
}

/// Factory for units of work.
#[async_trait]
pub trait UnitOfWorkManager: Send + Sync {
    /// Open a new atomic transaction.
    ///
    /// # Errors
    ///
    /// [`TaskError::Storage`] when the transaction cannot be started.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, TaskError>;
}

/// Clock abstraction for testable time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Generator of per-stream identifiers for logging and correlation.
///
/// Injected into the ingestion controller so tests can supply a
/// deterministic sequence; no hidden global state.
pub trait StreamSequence: Send + Sync {
    /// Next stream identifier.
    fn next_id(&self) -> u64;
}

/// Monotonic process-local sequence.
#[derive(Debug, Default)]
pub struct AtomicSequence(AtomicU64);

impl AtomicSequence {
    /// New sequence starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

impl StreamSequence for AtomicSequence {
    fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_sequence_is_monotonic() {
        let seq = AtomicSequence::new();
        assert_eq!(seq.next_id(), 1);
        assert_eq!(seq.next_id(), 2);
        assert_eq!(seq.next_id(), 3);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
