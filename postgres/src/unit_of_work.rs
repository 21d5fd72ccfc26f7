//! Transaction-backed unit of work.

use crate::{PostgresEventLedger, PostgresProgressRepository, PostgresTaskRepository, SharedTx};
use async_trait::async_trait;
use questline_core::error::TaskError;
use questline_core::ports::{Repositories, UnitOfWork, UnitOfWorkManager};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// One open `PostgreSQL` transaction with repositories bound to it.
///
/// Commit and rollback consume the transaction; the slot then holds `None`
/// and later calls surface [`TaskError::UnitOfWorkClosed`]. If the unit of
/// work is dropped with the slot still occupied, `sqlx` rolls the
/// transaction back when it is dropped in turn.
pub struct PostgresUnitOfWork {
    tx: SharedTx,
}

impl PostgresUnitOfWork {
    fn new(tx: sqlx::Transaction<'static, sqlx::Postgres>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn repositories(&self) -> Repositories {
        Repositories {
            tasks: Arc::new(PostgresTaskRepository::with_tx(Arc::clone(&self.tx))),
            progress: Arc::new(PostgresProgressRepository::with_tx(Arc::clone(&self.tx))),
            events: Arc::new(PostgresEventLedger::with_tx(Arc::clone(&self.tx))),
        }
    }

    async fn commit(&self) -> Result<(), TaskError> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(TaskError::UnitOfWorkClosed)?;
        tx.commit().await.map_err(TaskError::storage)?;
        metrics::counter!("questline.uow.committed").increment(1);
        debug!("unit of work committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), TaskError> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(TaskError::UnitOfWorkClosed)?;
        tx.rollback().await.map_err(TaskError::storage)?;
        metrics::counter!("questline.uow.rolled_back").increment(1);
        debug!("unit of work rolled back");
        Ok(())
    }
}

/// Opens transaction-backed units of work over one connection pool.
pub struct PostgresUnitOfWorkManager {
    pool: PgPool,
}

impl PostgresUnitOfWorkManager {
    /// Manager over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWorkManager for PostgresUnitOfWorkManager {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, TaskError> {
        let tx = self.pool.begin().await.map_err(TaskError::storage)?;
        Ok(Box::new(PostgresUnitOfWork::new(tx)))
    }
}
