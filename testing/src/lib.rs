//! # Questline Testing
//!
//! Deterministic test doubles for the Questline engine:
//!
//! - [`mocks::FixedClock`]: frozen time
//! - [`store::InMemoryStore`]: full in-memory implementation of the
//!   repository and unit-of-work traits, with commit/rollback semantics
//!   matching the `PostgreSQL` adapter
//!
//! ## Example
//!
//! ```ignore
//! use questline_testing::{mocks::test_clock, store::InMemoryStore};
//!
//! #[tokio::test]
//! async fn applies_progress() {
//!     let store = InMemoryStore::new();
//!     store.insert_task(sample_task("t-1", 10)).await;
//!     let service = store.service(test_config(), Arc::new(test_clock()));
//!     service.process_event(event).await.unwrap();
//! }
//! ```

pub mod store;

/// Mock implementations of the engine's environment traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use questline_core::ports::Clock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for common test fixtures.
pub mod fixtures {
    use chrono::Utc;
    use questline_core::event::{EventKind, ProgressPayload, TaskEvent};
    use questline_core::ids::{EventId, TaskId, UserId};
    use questline_core::task::{Task, TaskKind};
    use std::time::Duration;

    /// An active daily task with the given target.
    #[must_use]
    pub fn sample_task(id: &str, target: u32) -> Task {
        Task {
            id: TaskId::new(id),
            title: format!("Task {id}"),
            description: String::new(),
            kind: TaskKind::Daily,
            target,
            reward: serde_json::json!({"coins": 100}),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// A valid progress-update event.
    #[must_use]
    pub fn progress_event(event_id: &str, user: &str, task: &str, amount: u32) -> TaskEvent {
        TaskEvent {
            event_id: EventId::new(event_id),
            user_id: UserId::new(user),
            room_id: None,
            kind: EventKind::ProgressUpdate,
            payload: Some(ProgressPayload {
                task_id: TaskId::new(task),
                amount,
            }),
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Short timings so timer-driven tests finish quickly under paused time.
    #[must_use]
    pub fn test_config() -> questline_core::config::StreamConfig {
        questline_core::config::StreamConfig {
            idle_timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(5),
            subscribe_interval: Duration::from_secs(2),
            subscribe_max_duration: Duration::from_secs(300),
        }
    }
}
