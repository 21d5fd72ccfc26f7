//! Task engine use-cases.
//!
//! [`TaskService`] owns the four flows of the engine:
//!
//! - single-event application (validate → ledger check → dispatch → mutate
//!   → ledger write, all inside one unit of work)
//! - batch application (one unit of work for the whole batch; per-event
//!   rejections continue, anything else aborts all-or-nothing)
//! - the reward claim flow (one conditional transition, race-safe)
//! - progress queries and the periodic subscription stream
//!
//! Exactly one ledger row ever exists per distinct event identifier, so
//! re-delivery of an already-applied event is a reported success with no
//! further effect.

use crate::config::{ConfigError, StreamConfig};
use crate::error::TaskError;
use crate::event::{EventKind, TaskEvent};
use crate::ids::{TaskId, UserId};
use crate::ports::{
    ClaimOutcome, Clock, ProgressRepository, Repositories, TaskRepository, UnitOfWorkManager,
};
use crate::progress::TaskProgress;
use crate::task::Task;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Accepted/rejected counters for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Events whose effects were committed.
    pub accepted: u32,
    /// Events rejected by validation or business rules.
    pub rejected: u32,
}

/// A batch aborted by a non-rejection failure.
///
/// Carries the counters accumulated before the abort; the enclosing
/// transaction has been rolled back.
#[derive(Debug, Error)]
#[error(
    "batch aborted after {accepted} accepted, {rejected} rejected: {source}",
    accepted = outcome.accepted,
    rejected = outcome.rejected
)]
pub struct BatchError {
    /// Work attempted before the abort.
    pub outcome: BatchOutcome,
    /// The failure that aborted the batch.
    #[source]
    pub source: TaskError,
}

/// Active tasks paired with the calling user's progress (zero-value views
/// synthesized for records that do not exist yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// All active catalog tasks.
    pub tasks: Vec<Task>,
    /// Progress entries, index-aligned with `tasks`.
    pub progress: Vec<TaskProgress>,
}

/// The event-processing and transactional-consistency engine.
///
/// Cheap to clone; all storage handles are shared.
#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    progress: Arc<dyn ProgressRepository>,
    uow: Arc<dyn UnitOfWorkManager>,
    clock: Arc<dyn Clock>,
    pub(crate) config: StreamConfig,
}

impl TaskService {
    /// Build the engine over pool-bound read repositories, a unit-of-work
    /// manager for the write flows, an injected clock and the validated
    /// timing configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when any configured duration is zero — a startup
    /// fatal misconfiguration.
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        progress: Arc<dyn ProgressRepository>,
        uow: Arc<dyn UnitOfWorkManager>,
        clock: Arc<dyn Clock>,
        config: StreamConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tasks,
            progress,
            uow,
            clock,
            config,
        })
    }

    /// Timing configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Run `work` inside one unit of work: commit on success, roll back on
    /// error. Any other exit path (panic, cancellation) drops the unit of
    /// work, which rolls the transaction back on its own.
    async fn within<T, F, Fut>(&self, work: F) -> Result<T, TaskError>
    where
        F: FnOnce(Repositories) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let uow = self.uow.begin().await?;
        match work(uow.repositories()).await {
            Ok(value) => {
                uow.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Apply one validated event. Succeeds as a no-op when the event
    /// identifier is already in the ledger.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidEvent`] before any storage access; otherwise the
    /// pipeline failures of §event application (unsupported kind, task not
    /// found/inactive, storage faults).
    pub async fn process_event(&self, event: TaskEvent) -> Result<(), TaskError> {
        if let Err(err) = event.validate() {
            warn!(error = %err, "process event validation failed");
            return Err(err.into());
        }

        info!(
            event_id = %event.event_id,
            user_id = %event.user_id,
            kind = %event.kind,
            "process event"
        );
        let result = self
            .within(|repos| async move { self.apply_event(&repos, &event).await })
            .await;
        match &result {
            Ok(()) => debug!("process event done"),
            Err(err) => warn!(error = %err, "process event failed"),
        }
        result
    }

    /// Apply an ordered batch of events under a single unit of work.
    ///
    /// Structurally invalid events are counted as rejected without touching
    /// storage. Business-rule rejections count and continue; any other
    /// failure rolls the whole batch back.
    ///
    /// # Errors
    ///
    /// [`BatchError`] carrying the counters accumulated before the abort.
    pub async fn process_events(&self, events: Vec<TaskEvent>) -> Result<BatchOutcome, BatchError> {
        if events.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut rejected: u32 = 0;
        let mut valid = Vec::with_capacity(events.len());
        for event in events {
            match event.validate() {
                Ok(()) => valid.push(event),
                Err(err) => {
                    warn!(error = %err, "batch event validation failed");
                    rejected += 1;
                }
            }
        }
        if valid.is_empty() {
            return Ok(BatchOutcome { accepted: 0, rejected });
        }

        let abort = |accepted: u32, rejected: u32, source: TaskError| BatchError {
            outcome: BatchOutcome { accepted, rejected },
            source,
        };

        let uow = match self.uow.begin().await {
            Ok(uow) => uow,
            Err(err) => return Err(abort(0, rejected, err)),
        };
        let repos = uow.repositories();

        let mut accepted: u32 = 0;
        for event in &valid {
            match self.apply_event(&repos, event).await {
                Ok(()) => accepted += 1,
                Err(err) if err.is_rejection() => {
                    debug!(event_id = %event.event_id, error = %err, "batch event rejected");
                    rejected += 1;
                }
                Err(err) => {
                    if let Err(rollback_err) = uow.rollback().await {
                        warn!(error = %rollback_err, "batch rollback failed");
                    }
                    warn!(error = %err, "batch aborted");
                    return Err(abort(accepted, rejected, err));
                }
            }
        }

        if let Err(err) = uow.commit().await {
            return Err(abort(accepted, rejected, err));
        }

        metrics::counter!("questline.events.accepted").increment(u64::from(accepted));
        metrics::counter!("questline.events.rejected").increment(u64::from(rejected));
        Ok(BatchOutcome { accepted, rejected })
    }

    /// One pass of the event application pipeline, inside an open unit of
    /// work: ledger check, closed-variant dispatch, processed stamp, ledger
    /// write.
    pub(crate) async fn apply_event(
        &self,
        repos: &Repositories,
        event: &TaskEvent,
    ) -> Result<(), TaskError> {
        if repos.events.is_processed(&event.event_id).await? {
            debug!(event_id = %event.event_id, "event already processed");
            return Ok(());
        }

        match event.kind {
            EventKind::ProgressUpdate | EventKind::TaskSubscribed | EventKind::TaskStepCounted => {
                let payload = event
                    .payload
                    .as_ref()
                    .ok_or(crate::error::ValidationError::MissingPayload)?;
                self.apply_progress_update(repos, &event.user_id, &payload.task_id, payload.amount)
                    .await?;
            }
            other => return Err(TaskError::UnsupportedKind(other.as_str().to_string())),
        }

        let mut stamped = event.clone();
        if stamped.processed_at.is_none() {
            stamped.processed_at = Some(self.clock.now());
        }
        repos.events.mark_processed(&stamped).await
    }

    /// The progress-update procedure: load task, reject inactive, load or
    /// create the record, advance through the state machine, persist.
    async fn apply_progress_update(
        &self,
        repos: &Repositories,
        user: &UserId,
        task_id: &TaskId,
        amount: u32,
    ) -> Result<(), TaskError> {
        let task = repos.tasks.get_by_id(task_id).await?;
        if !task.is_active {
            return Err(TaskError::TaskInactive(task.id));
        }

        let now = self.clock.now();
        let mut record = match repos.progress.get(user, &task.id).await? {
            Some(record) => record,
            None => TaskProgress::new(task.id.clone(), user.clone(), now),
        };

        // Post-completion events still arrive; they must not mutate anything.
        if record.completed {
            return Ok(());
        }

        if record.add(amount, task.target, now) {
            debug!(user_id = %user, task_id = %task.id, "task completed");
        }
        if record.id.is_some() {
            repos.progress.update(&record).await
        } else {
            repos.progress.create(&record).await.map(|_| ())
        }
    }

    /// Claim the reward for a completed task exactly once.
    ///
    /// A retried claim on an already-claimed record is a benign success.
    ///
    /// # Errors
    ///
    /// [`TaskError::TaskNotFound`], [`TaskError::ProgressNotFound`],
    /// [`TaskError::NotCompleted`], or storage faults.
    pub async fn claim_reward(&self, user: &UserId, task: &TaskId) -> Result<(), TaskError> {
        info!(user_id = %user, task_id = %task, "claim reward");
        let now = self.clock.now();
        let result = self
            .within(|repos| async move {
                repos.tasks.get_by_id(task).await?;
                match repos.progress.claim(user, task, now).await? {
                    ClaimOutcome::Claimed => {
                        metrics::counter!("questline.claims").increment(1);
                        info!(user_id = %user, task_id = %task, "reward claimed");
                    }
                    ClaimOutcome::AlreadyClaimed => {
                        debug!(user_id = %user, task_id = %task, "claim retried, already claimed");
                    }
                }
                Ok(())
            })
            .await;
        if let Err(err) = &result {
            warn!(error = %err, "claim reward failed");
        }
        result
    }

    /// All active tasks with the calling user's progress; absent records
    /// are synthesized as zero-value views, never an error.
    ///
    /// # Errors
    ///
    /// Storage faults only.
    pub async fn get_tasks_with_progress(
        &self,
        user: &UserId,
    ) -> Result<ProgressSnapshot, TaskError> {
        debug!(user_id = %user, "get tasks with progress");
        let tasks = self.tasks.list_active().await?;
        let now = self.clock.now();
        let mut progress = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let record = self
                .progress
                .get(user, &task.id)
                .await?
                .unwrap_or_else(|| TaskProgress::new(task.id.clone(), user.clone(), now));
            progress.push(record);
        }
        Ok(ProgressSnapshot { tasks, progress })
    }

    /// Load one catalog task.
    ///
    /// # Errors
    ///
    /// [`TaskError::TaskNotFound`] or storage faults.
    pub async fn get_task(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.tasks.get_by_id(id).await
    }

    /// Periodic snapshot stream for one user: an immediate initial
    /// snapshot, then a full recomputation every refresh interval, ending
    /// cleanly when the maximum session duration elapses or the consumer
    /// drops the stream. Ticks are full recomputations, not diffs.
    pub fn subscribe(
        &self,
        user: UserId,
    ) -> impl Stream<Item = Result<ProgressSnapshot, TaskError>> + Send + 'static + use<> {
        let service = self.clone();
        async_stream::stream! {
            info!(user_id = %user, "subscribe progress");
            let deadline = tokio::time::sleep(service.config.subscribe_max_duration);
            tokio::pin!(deadline);
            let mut ticker = tokio::time::interval(service.config.subscribe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = &mut deadline => {
                        info!(user_id = %user, "subscribe progress session expired");
                        break;
                    }
                    // First tick completes immediately: the initial snapshot.
                    _ = ticker.tick() => {
                        match service.get_tasks_with_progress(&user).await {
                            Ok(snapshot) => yield Ok(snapshot),
                            Err(err) => {
                                warn!(user_id = %user, error = %err, "subscribe progress failed");
                                yield Err(err);
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}
