//! In-memory storage with real unit-of-work semantics.
//!
//! [`InMemoryStore`] implements the full storage boundary of the engine.
//! A unit of work takes an owned lock on the whole store and mutates a
//! working copy; commit publishes the copy, rollback (or drop) discards it.
//! Units of work therefore serialize against each other, which is exactly
//! the isolation the engine's correctness arguments assume of the real
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use questline_core::config::StreamConfig;
use questline_core::error::TaskError;
use questline_core::event::TaskEvent;
use questline_core::ids::{EventId, ProgressId, TaskId, UserId};
use questline_core::ports::{
    ClaimOutcome, Clock, EventRepository, ProgressRepository, Repositories, TaskRepository,
    UnitOfWork, UnitOfWorkManager,
};
use questline_core::progress::TaskProgress;
use questline_core::service::TaskService;
use questline_core::task::Task;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The whole persisted state.
#[derive(Debug, Clone, Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    progress: HashMap<(UserId, TaskId), TaskProgress>,
    events: HashMap<EventId, TaskEvent>,
}

/// Shared knobs and counters.
#[derive(Debug, Default)]
struct Shared {
    fail_event_ledger: AtomicBool,
    next_progress_id: AtomicU64,
}

impl Shared {
    fn next_progress_id(&self) -> ProgressId {
        let n = self.next_progress_id.fetch_add(1, Ordering::Relaxed) + 1;
        ProgressId::new(format!("p-{n}"))
    }
}

/// In-memory implementation of the engine's storage boundary.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a catalog task.
    pub async fn insert_task(&self, task: Task) {
        self.state.lock().await.tasks.insert(task.id.clone(), task);
    }

    /// Seed a progress record directly, bypassing the event pipeline.
    pub async fn insert_progress(&self, mut progress: TaskProgress) {
        if progress.id.is_none() {
            progress.id = Some(self.shared.next_progress_id());
        }
        self.state.lock().await.progress.insert(
            (progress.user_id.clone(), progress.task_id.clone()),
            progress,
        );
    }

    /// The committed progress record for a (user, task) pair, if any.
    pub async fn progress(&self, user: &UserId, task: &TaskId) -> Option<TaskProgress> {
        self.state
            .lock()
            .await
            .progress
            .get(&(user.clone(), task.clone()))
            .cloned()
    }

    /// Whether an event identifier is in the committed ledger.
    pub async fn event_recorded(&self, id: &EventId) -> bool {
        self.state.lock().await.events.contains_key(id)
    }

    /// Make every subsequent ledger write fail with a storage error.
    /// Simulates an infrastructure fault mid-transaction.
    pub fn fail_event_ledger(&self, fail: bool) {
        self.shared.fail_event_ledger.store(fail, Ordering::Relaxed);
    }

    /// Pool-equivalent read repositories bound to the committed state.
    #[must_use]
    pub fn repositories(&self) -> (Arc<dyn TaskRepository>, Arc<dyn ProgressRepository>) {
        (
            Arc::new(DirectTasks {
                state: Arc::clone(&self.state),
            }),
            Arc::new(DirectProgress {
                state: Arc::clone(&self.state),
            }),
        )
    }

    /// Unit-of-work manager over this store.
    #[must_use]
    pub fn manager(&self) -> Arc<dyn UnitOfWorkManager> {
        Arc::new(InMemoryUnitOfWorkManager {
            state: Arc::clone(&self.state),
            shared: Arc::clone(&self.shared),
        })
    }

    /// A fully wired [`TaskService`] over this store.
    ///
    /// # Panics
    ///
    /// Panics if `config` contains a zero duration; test configurations are
    /// fixed and valid.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn service(&self, config: StreamConfig, clock: Arc<dyn Clock>) -> Arc<TaskService> {
        let (tasks, progress) = self.repositories();
        Arc::new(
            TaskService::new(tasks, progress, self.manager(), clock, config)
                .expect("test config should be valid"),
        )
    }
}

struct DirectTasks {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl TaskRepository for DirectTasks {
    async fn get_by_id(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.state
            .lock()
            .await
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::TaskNotFound(id.clone()))
    }

    async fn list_active(&self) -> Result<Vec<Task>, TaskError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.is_active)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }
}

struct DirectProgress {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl ProgressRepository for DirectProgress {
    async fn get(
        &self,
        user: &UserId,
        task: &TaskId,
    ) -> Result<Option<TaskProgress>, TaskError> {
        Ok(self
            .state
            .lock()
            .await
            .progress
            .get(&(user.clone(), task.clone()))
            .cloned())
    }

    async fn create(&self, _progress: &TaskProgress) -> Result<TaskProgress, TaskError> {
        Err(TaskError::Storage(
            "writes must go through a unit of work".to_string(),
        ))
    }

    async fn update(&self, _progress: &TaskProgress) -> Result<(), TaskError> {
        Err(TaskError::Storage(
            "writes must go through a unit of work".to_string(),
        ))
    }

    async fn claim(
        &self,
        _user: &UserId,
        _task: &TaskId,
        _now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, TaskError> {
        Err(TaskError::Storage(
            "writes must go through a unit of work".to_string(),
        ))
    }
}

/// Working copy plus the owned lock that guards the committed state.
struct TxState {
    guard: Option<OwnedMutexGuard<StoreState>>,
    working: StoreState,
}

struct InMemoryUnitOfWork {
    tx: Arc<Mutex<TxState>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn repositories(&self) -> Repositories {
        Repositories {
            tasks: Arc::new(TxTasks {
                tx: Arc::clone(&self.tx),
            }),
            progress: Arc::new(TxProgress {
                tx: Arc::clone(&self.tx),
                shared: Arc::clone(&self.shared),
            }),
            events: Arc::new(TxEvents {
                tx: Arc::clone(&self.tx),
                shared: Arc::clone(&self.shared),
            }),
        }
    }

    async fn commit(&self) -> Result<(), TaskError> {
        let mut tx = self.tx.lock().await;
        let mut guard = tx.guard.take().ok_or(TaskError::UnitOfWorkClosed)?;
        *guard = tx.working.clone();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), TaskError> {
        let mut tx = self.tx.lock().await;
        // Dropping the guard releases the store; the working copy is
        // discarded with the unit of work.
        tx.guard.take().ok_or(TaskError::UnitOfWorkClosed)?;
        Ok(())
    }
}

struct InMemoryUnitOfWorkManager {
    state: Arc<Mutex<StoreState>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl UnitOfWorkManager for InMemoryUnitOfWorkManager {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, TaskError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            tx: Arc::new(Mutex::new(TxState {
                guard: Some(guard),
                working,
            })),
            shared: Arc::clone(&self.shared),
        }))
    }
}

fn open<'a>(tx: &'a mut TxState) -> Result<&'a mut StoreState, TaskError> {
    if tx.guard.is_none() {
        return Err(TaskError::UnitOfWorkClosed);
    }
    Ok(&mut tx.working)
}

struct TxTasks {
    tx: Arc<Mutex<TxState>>,
}

#[async_trait]
impl TaskRepository for TxTasks {
    async fn get_by_id(&self, id: &TaskId) -> Result<Task, TaskError> {
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        state
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::TaskNotFound(id.clone()))
    }

    async fn list_active(&self) -> Result<Vec<Task>, TaskError> {
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.is_active)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }
}

struct TxProgress {
    tx: Arc<Mutex<TxState>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl ProgressRepository for TxProgress {
    async fn get(
        &self,
        user: &UserId,
        task: &TaskId,
    ) -> Result<Option<TaskProgress>, TaskError> {
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        Ok(state.progress.get(&(user.clone(), task.clone())).cloned())
    }

    async fn create(&self, progress: &TaskProgress) -> Result<TaskProgress, TaskError> {
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        let key = (progress.user_id.clone(), progress.task_id.clone());
        if state.progress.contains_key(&key) {
            return Err(TaskError::Storage(format!(
                "duplicate progress for user {} task {}",
                progress.user_id, progress.task_id
            )));
        }
        let mut created = progress.clone();
        created.id = Some(self.shared.next_progress_id());
        state.progress.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, progress: &TaskProgress) -> Result<(), TaskError> {
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        let key = (progress.user_id.clone(), progress.task_id.clone());
        match state.progress.get_mut(&key) {
            Some(existing) => {
                *existing = progress.clone();
                Ok(())
            }
            None => Err(TaskError::ProgressNotFound {
                user: progress.user_id.clone(),
                task: progress.task_id.clone(),
            }),
        }
    }

    async fn claim(
        &self,
        user: &UserId,
        task: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, TaskError> {
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        match state.progress.get_mut(&(user.clone(), task.clone())) {
            None => Err(TaskError::ProgressNotFound {
                user: user.clone(),
                task: task.clone(),
            }),
            Some(record) if record.claimed => Ok(ClaimOutcome::AlreadyClaimed),
            Some(record) if !record.completed => Err(TaskError::NotCompleted(task.clone())),
            Some(record) => {
                record.claimed = true;
                record.updated_at = now;
                Ok(ClaimOutcome::Claimed)
            }
        }
    }
}

struct TxEvents {
    tx: Arc<Mutex<TxState>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl EventRepository for TxEvents {
    async fn is_processed(&self, id: &EventId) -> Result<bool, TaskError> {
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        Ok(state.events.contains_key(id))
    }

    async fn mark_processed(&self, event: &TaskEvent) -> Result<(), TaskError> {
        if self.shared.fail_event_ledger.load(Ordering::Relaxed) {
            return Err(TaskError::Storage("injected ledger failure".to_string()));
        }
        let mut tx = self.tx.lock().await;
        let state = open(&mut tx)?;
        state
            .events
            .entry(event.event_id.clone())
            .or_insert_with(|| event.clone());
        Ok(())
    }
}
