//! Progress state machine.
//!
//! Pure transition logic for a user's advancement toward one task. No I/O
//! here; persistence happens through the repositories under a unit of work.
//!
//! State transitions:
//!
//! ```text
//! accumulating --(sum >= target)--> completed --(claim)--> claimed
//! ```
//!
//! `progress` is monotonically non-decreasing while uncompleted and is
//! clamped to `target` the instant it would reach or exceed it; `completed`
//! and `claimed` never revert.

use crate::error::TaskError;
use crate::ids::{ProgressId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user's progress toward one task.
///
/// A record may not exist yet for a given (user, task); callers synthesize
/// a zero-value view with [`TaskProgress::new`] in that case. The two states
/// are indistinguishable to readers by design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Storage-assigned identifier; `None` until first persisted.
    pub id: Option<ProgressId>,
    /// Task this progress belongs to.
    pub task_id: TaskId,
    /// Owning user.
    pub user_id: UserId,
    /// Accumulated count, always `<=` the task target.
    pub progress: u32,
    /// Set when `progress` first reaches the target; never reverts.
    pub completed: bool,
    /// Set by the claim flow; reachable only from completed. Never reverts.
    pub claimed: bool,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    /// Fresh zero-value record for a (user, task) pair.
    #[must_use]
    pub fn new(task_id: TaskId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            task_id,
            user_id,
            progress: 0,
            completed: false,
            claimed: false,
            updated_at: now,
        }
    }

    /// Apply a progress amount against the task target.
    ///
    /// Already-completed records are untouched (events may still arrive
    /// after completion). Addition saturates at `target`; `completed` is set
    /// the moment the running sum reaches or exceeds it.
    ///
    /// Returns `true` if this call completed the task.
    pub fn add(&mut self, amount: u32, target: u32, now: DateTime<Utc>) -> bool {
        if self.completed {
            return false;
        }

        self.updated_at = now;
        self.progress = self.progress.saturating_add(amount);
        if self.progress >= target {
            self.progress = target;
            self.completed = true;
            return true;
        }
        false
    }

    /// Whether the reward can be claimed from the current state.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotCompleted`] if the task is not completed yet
    /// - [`TaskError::AlreadyClaimed`] if the reward was already collected
    pub fn can_claim(&self) -> Result<(), TaskError> {
        if !self.completed {
            return Err(TaskError::NotCompleted(self.task_id.clone()));
        }
        if self.claimed {
            return Err(TaskError::AlreadyClaimed(self.task_id.clone()));
        }
        Ok(())
    }

    /// Transition to claimed, conditioned on `completed && !claimed`.
    ///
    /// # Errors
    ///
    /// Propagates the [`Self::can_claim`] precondition failures.
    pub fn mark_claimed(&mut self, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.can_claim()?;
        self.claimed = true;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fresh() -> TaskProgress {
        TaskProgress::new(TaskId::new("t-1"), UserId::new("u-1"), Utc::now())
    }

    #[test]
    fn accumulates_until_target() {
        let mut p = fresh();
        assert!(!p.add(4, 10, Utc::now()));
        assert_eq!(p.progress, 4);
        assert!(!p.completed);

        assert!(!p.add(4, 10, Utc::now()));
        assert_eq!(p.progress, 8);

        assert!(p.add(4, 10, Utc::now()));
        assert_eq!(p.progress, 10);
        assert!(p.completed);
    }

    #[test]
    fn clamps_overshoot_to_target() {
        let mut p = fresh();
        assert!(p.add(25, 10, Utc::now()));
        assert_eq!(p.progress, 10);
        assert!(p.completed);
    }

    #[test]
    fn completed_record_ignores_further_events() {
        let mut p = fresh();
        p.add(10, 10, Utc::now());
        let before = p.updated_at;
        assert!(!p.add(3, 10, Utc::now()));
        assert_eq!(p.progress, 10);
        assert_eq!(p.updated_at, before);
    }

    #[test]
    fn claim_requires_completion() {
        let mut p = fresh();
        assert!(matches!(p.can_claim(), Err(TaskError::NotCompleted(_))));
        assert!(matches!(
            p.mark_claimed(Utc::now()),
            Err(TaskError::NotCompleted(_))
        ));
        assert!(!p.claimed);
    }

    #[test]
    fn claim_is_one_shot() {
        let mut p = fresh();
        p.add(10, 10, Utc::now());
        p.mark_claimed(Utc::now()).unwrap();
        assert!(p.claimed);
        assert!(matches!(
            p.mark_claimed(Utc::now()),
            Err(TaskError::AlreadyClaimed(_))
        ));
    }

    proptest! {
        /// For any sequence of positive amounts and target T, the final
        /// progress equals min(T, sum), completion happens exactly when the
        /// running sum first reaches T, and progress never decreases.
        #[test]
        fn accumulation_law(
            amounts in proptest::collection::vec(1u32..100, 0..32),
            target in 1u32..500,
        ) {
            let mut p = fresh();
            let mut running: u64 = 0;
            let mut prev = 0u32;

            for amount in &amounts {
                let was_completed = p.completed;
                let completed_now = p.add(*amount, target, Utc::now());
                if !was_completed {
                    running += u64::from(*amount);
                }

                prop_assert!(p.progress >= prev);
                prop_assert!(p.progress <= target);
                if completed_now {
                    prop_assert!(running >= u64::from(target));
                }
                prev = p.progress;
            }

            let expected = u64::from(target).min(running);
            prop_assert_eq!(u64::from(p.progress), expected);
            prop_assert_eq!(p.completed, running >= u64::from(target));
        }
    }
}
