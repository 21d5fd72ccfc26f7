//! Idempotency ledger repository.

use crate::{Db, SharedTx};
use async_trait::async_trait;
use questline_core::error::TaskError;
use questline_core::event::TaskEvent;
use questline_core::ids::EventId;
use questline_core::ports::EventRepository;
use sqlx::PgPool;

/// `PostgreSQL`-backed idempotency ledger.
///
/// One row per distinct event identifier. Two concurrent transactions
/// carrying the same identifier can both pass `is_processed` before either
/// commits; the insert detects the losing side (zero rows affected) and
/// fails it, so only one delivery's effects ever commit.
pub struct PostgresEventLedger {
    db: Db,
}

impl PostgresEventLedger {
    /// Pool-bound ledger.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { db: Db::Pool(pool) }
    }

    pub(crate) fn with_tx(tx: SharedTx) -> Self {
        Self { db: Db::Tx(tx) }
    }
}

#[async_trait]
impl EventRepository for PostgresEventLedger {
    async fn is_processed(&self, id: &EventId) -> Result<bool, TaskError> {
        let mut conn = self.db.conn().await?;
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM task_events WHERE event_id = $1)",
        )
        .bind(id.as_str())
        .fetch_one(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;
        Ok(exists)
    }

    async fn mark_processed(&self, event: &TaskEvent) -> Result<(), TaskError> {
        let payload = event
            .payload
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(TaskError::storage)?;

        let mut conn = self.db.conn().await?;
        let result = sqlx::query(
            r"
            INSERT INTO task_events
                (event_id, user_id, room_id, kind, payload, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()))
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(event.event_id.as_str())
        .bind(event.user_id.as_str())
        .bind(event.room_id.as_ref().map(|room| room.as_str().to_string()))
        .bind(event.kind.as_str())
        .bind(payload)
        .bind(event.created_at)
        .bind(event.processed_at)
        .execute(conn.as_conn()?)
        .await
        .map_err(TaskError::storage)?;

        // Zero rows means another delivery won the race after our
        // `is_processed` check; abort so our effects roll back. A retry of
        // this event then no-ops through the ledger check.
        if result.rows_affected() == 0 {
            return Err(TaskError::Storage(format!(
                "event {} was recorded by a concurrent delivery",
                event.event_id
            )));
        }
        Ok(())
    }
}
