//! Progress record repository.

use crate::{bind_i32, column_u32, Db, SharedTx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use questline_core::error::TaskError;
use questline_core::ids::{ProgressId, TaskId, UserId};
use questline_core::ports::{ClaimOutcome, ProgressRepository};
use questline_core::progress::TaskProgress;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed persistence for progress records.
pub struct PostgresProgressRepository {
    db: Db,
}

impl PostgresProgressRepository {
    /// Pool-bound repository for the read paths.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { db: Db::Pool(pool) }
    }

    pub(crate) fn with_tx(tx: SharedTx) -> Self {
        Self { db: Db::Tx(tx) }
    }

    fn from_row(row: &PgRow) -> Result<TaskProgress, TaskError> {
        let id: String = row.try_get("id").map_err(TaskError::storage)?;
        let task_id: String = row.try_get("task_id").map_err(TaskError::storage)?;
        let user_id: String = row.try_get("user_id").map_err(TaskError::storage)?;
        let progress: i32 = row.try_get("progress").map_err(TaskError::storage)?;
        Ok(TaskProgress {
            id: Some(ProgressId::new(id)),
            task_id: TaskId::new(task_id),
            user_id: UserId::new(user_id),
            progress: column_u32(progress, "progress")?,
            completed: row.try_get("completed").map_err(TaskError::storage)?,
            claimed: row.try_get("claimed").map_err(TaskError::storage)?,
            updated_at: row.try_get("updated_at").map_err(TaskError::storage)?,
        })
    }
}

#[async_trait]
impl ProgressRepository for PostgresProgressRepository {
    async fn get(
        &self,
        user: &UserId,
        task: &TaskId,
    ) -> Result<Option<TaskProgress>, TaskError> {
        let mut conn = self.db.conn().await?;
        let row = sqlx::query(
            r"
            SELECT id, task_id, user_id, progress, completed, claimed, updated_at
            FROM task_progress
            WHERE user_id = $1 AND task_id = $2
            ",
        )
        .bind(user.as_str())
        .bind(task.as_str())
        .fetch_optional(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn create(&self, progress: &TaskProgress) -> Result<TaskProgress, TaskError> {
        let mut conn = self.db.conn().await?;
        let id: (String,) = sqlx::query_as(
            r"
            INSERT INTO task_progress (task_id, user_id, progress, completed, claimed, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(progress.task_id.as_str())
        .bind(progress.user_id.as_str())
        .bind(bind_i32(progress.progress, "progress")?)
        .bind(progress.completed)
        .bind(progress.claimed)
        .bind(progress.updated_at)
        .fetch_one(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        let mut created = progress.clone();
        created.id = Some(ProgressId::new(id.0));
        Ok(created)
    }

    async fn update(&self, progress: &TaskProgress) -> Result<(), TaskError> {
        let mut conn = self.db.conn().await?;
        let result = sqlx::query(
            r"
            UPDATE task_progress
            SET progress = $3, completed = $4, claimed = $5, updated_at = $6
            WHERE user_id = $1 AND task_id = $2
            ",
        )
        .bind(progress.user_id.as_str())
        .bind(progress.task_id.as_str())
        .bind(bind_i32(progress.progress, "progress")?)
        .bind(progress.completed)
        .bind(progress.claimed)
        .bind(progress.updated_at)
        .execute(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        if result.rows_affected() == 0 {
            return Err(TaskError::ProgressNotFound {
                user: progress.user_id.clone(),
                task: progress.task_id.clone(),
            });
        }
        Ok(())
    }

    async fn claim(
        &self,
        user: &UserId,
        task: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, TaskError> {
        let mut conn = self.db.conn().await?;

        // One conditional update; concurrent claimers race on the row, the
        // loser matches zero rows.
        let result = sqlx::query(
            r"
            UPDATE task_progress
            SET claimed = TRUE, updated_at = $3
            WHERE user_id = $1 AND task_id = $2 AND completed AND NOT claimed
            ",
        )
        .bind(user.as_str())
        .bind(task.as_str())
        .bind(now)
        .execute(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        // Zero rows: inspect the record to tell the cases apart.
        let state: Option<(bool, bool)> = sqlx::query_as(
            r"
            SELECT completed, claimed
            FROM task_progress
            WHERE user_id = $1 AND task_id = $2
            ",
        )
        .bind(user.as_str())
        .bind(task.as_str())
        .fetch_optional(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        match state {
            None => Err(TaskError::ProgressNotFound {
                user: user.clone(),
                task: task.clone(),
            }),
            Some((_, true)) => Ok(ClaimOutcome::AlreadyClaimed),
            Some((false, _)) => Err(TaskError::NotCompleted(task.clone())),
            Some((true, false)) => {
                // The conditional update should have matched; treat the
                // inconsistent read as an infrastructure fault.
                Err(TaskError::Storage(format!(
                    "claim update matched no rows for user {user} task {task}"
                )))
            }
        }
    }
}
