//! # Questline Core
//!
//! Domain entities and the idempotent event-application engine for tracking
//! user progress toward a catalog of tasks.
//!
//! ## Core Concepts
//!
//! - **Task**: a catalog-defined goal with a numeric target and reward
//! - **`TaskProgress`**: a user's accumulated advancement toward one task,
//!   governed by a pure state machine (no I/O)
//! - **`TaskEvent`**: an external signal that may advance progress; applied
//!   exactly once per event identifier via the idempotency ledger
//! - **Unit of Work**: an atomic, all-or-nothing scope spanning multiple
//!   repository operations
//! - **Claim**: the one-time transition that marks a completed task's reward
//!   as collected
//!
//! ## Architecture Principles
//!
//! - Pure entity logic, imperative shell: state transitions live on the
//!   entities; the service orchestrates them under a unit of work
//! - Idempotent application: duplicate delivery of the same event identifier
//!   is a reported success with no further effect
//! - Dependency injection via traits (`Clock`, repositories, unit of work)
//! - Isolation is delegated to the storage transaction, never to in-process
//!   locks
//!
//! ## Example
//!
//! ```ignore
//! use questline_core::service::TaskService;
//!
//! let service = TaskService::new(tasks, progress, uow, clock, config)?;
//! service.process_event(event).await?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod ingest;
pub mod ports;
pub mod progress;
pub mod service;
pub mod task;

pub use config::StreamConfig;
pub use error::{TaskError, ValidationError};
pub use event::{EventKind, ProgressPayload, TaskEvent};
pub use ids::{EventId, RoomId, TaskId, UserId};
pub use ingest::{EventBatch, EventStreamProcessor, ReceiveError, StreamError, StreamTally};
pub use progress::TaskProgress;
pub use service::{BatchError, BatchOutcome, ProgressSnapshot, TaskService};
pub use task::{Task, TaskKind};
