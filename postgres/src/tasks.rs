//! Task catalog repository.

use crate::{column_u32, Db, SharedTx};
use async_trait::async_trait;
use questline_core::error::TaskError;
use questline_core::ids::TaskId;
use questline_core::ports::TaskRepository;
use questline_core::task::{Task, TaskKind};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const TASK_COLUMNS: &str = "id, title, description, kind, target, reward, is_active, created_at";

/// `PostgreSQL`-backed read access to the task catalog.
pub struct PostgresTaskRepository {
    db: Db,
}

impl PostgresTaskRepository {
    /// Pool-bound repository for the read paths.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { db: Db::Pool(pool) }
    }

    pub(crate) fn with_tx(tx: SharedTx) -> Self {
        Self { db: Db::Tx(tx) }
    }

    fn from_row(row: &PgRow) -> Result<Task, TaskError> {
        let kind: String = row.try_get("kind").map_err(TaskError::storage)?;
        let kind = TaskKind::parse(&kind)
            .ok_or_else(|| TaskError::Storage(format!("unknown task kind column: {kind}")))?;
        let id: String = row.try_get("id").map_err(TaskError::storage)?;
        let target: i32 = row.try_get("target").map_err(TaskError::storage)?;
        Ok(Task {
            id: TaskId::new(id),
            title: row.try_get("title").map_err(TaskError::storage)?,
            description: row.try_get("description").map_err(TaskError::storage)?,
            kind,
            target: column_u32(target, "target")?,
            reward: row.try_get("reward").map_err(TaskError::storage)?,
            is_active: row.try_get("is_active").map_err(TaskError::storage)?,
            created_at: row.try_get("created_at").map_err(TaskError::storage)?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn get_by_id(&self, id: &TaskId) -> Result<Task, TaskError> {
        let mut conn = self.db.conn().await?;
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        match row {
            Some(row) => Self::from_row(&row),
            None => Err(TaskError::TaskNotFound(id.clone())),
        }
    }

    async fn list_active(&self) -> Result<Vec<Task>, TaskError> {
        let mut conn = self.db.conn().await?;
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE is_active ORDER BY created_at, id"
        ))
        .fetch_all(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        rows.iter().map(Self::from_row).collect()
    }
}
