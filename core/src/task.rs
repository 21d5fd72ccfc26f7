//! Catalog task entity.

use crate::ids::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a catalog task. Closed set; anything else is rejected at the
/// transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Recurring daily quest.
    Daily,
    /// Social action (invites, shares, follows).
    Social,
    /// In-activity/in-game quest.
    InGame,
}

impl TaskKind {
    /// Database/wire string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Social => "social",
            Self::InGame => "game",
        }
    }

    /// Parse from the database/wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "social" => Some(Self::Social),
            "game" => Some(Self::InGame),
            _ => None,
        }
    }
}

/// A catalog entry: a goal with a numeric target and an opaque reward.
///
/// Immutable after creation except for `is_active`, which is managed
/// externally (catalog administration is not part of this engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Catalog identifier.
    pub id: TaskId,
    /// Short human-readable title.
    pub title: String,
    /// Longer description shown to users.
    pub description: String,
    /// Task kind.
    pub kind: TaskKind,
    /// Progress count required to complete the task.
    pub target: u32,
    /// Opaque reward descriptor; the engine never interprets it.
    pub reward: serde_json::Value,
    /// Inactive tasks reject progress events.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
